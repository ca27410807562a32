//! Freshness prober: detect when a mutable image tag now resolves to a
//! different digest than the one the serving pod runs.
//!
//! The reconciler never talks to a registry. Instead a throwaway, unselected
//! probe pod is started with the same image reference; whatever digest the
//! kubelet resolves for it is the tag's current digest. Probes run in the
//! background and hand their result back through a single-slot channel that
//! the reconcile path only ever polls.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use metrics::counter;
use registry_core::{clock::elapsed_between, CatalogSource, Clock};
use registry_kubehub::{Lister, ObjectStore};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::{decorator, lookup};

/// Outcome of polling a probe without waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbePoll {
    /// Still running.
    Pending,
    /// The probe pod reported this digest.
    Ready(String),
    /// The probe ended without a digest.
    Abandoned,
}

/// A running probe: its task plus the receiving end of a one-slot channel.
/// The task never blocks on delivery, whether or not anyone polls.
#[derive(Debug)]
pub struct ProbeHandle {
    image: String,
    digest: oneshot::Receiver<String>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Start probing `pod`'s image in `namespace`. Must be called within a Tokio runtime.
    pub fn spawn(store: Arc<dyn ObjectStore>, namespace: String, pod: Pod, attempts: u32, backoff: Duration) -> Self {
        let image = lookup::pod_image(&pod).unwrap_or_default().to_string();
        let (tx, rx) = oneshot::channel::<String>();
        let task = tokio::spawn(run_probe(store, namespace, pod, attempts, backoff, tx));
        Self { image, digest: rx, task }
    }

    /// Image reference the probe pod was started with.
    pub fn image(&self) -> &str { &self.image }

    /// Non-blocking check for a result.
    pub fn poll(&mut self) -> ProbePoll {
        match self.digest.try_recv() {
            Ok(d) => ProbePoll::Ready(d),
            Err(TryRecvError::Empty) => ProbePoll::Pending,
            Err(TryRecvError::Closed) => ProbePoll::Abandoned,
        }
    }

    /// Abort the probe task. The probe pod, if created, is left to owner-based GC.
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn run_probe(
    store: Arc<dyn ObjectStore>,
    namespace: String,
    pod: Pod,
    attempts: u32,
    backoff: Duration,
    tx: oneshot::Sender<String>,
) {
    let created = match store.create_pod(&namespace, &pod).await {
        Ok(p) => p,
        Err(e) => {
            warn!(ns = %namespace, error = %e, "couldn't create catalog source probe pod");
            return;
        }
    };
    let name = created.name_any();
    debug!(ns = %namespace, pod = %name, "probe pod created");
    for attempt in 1..=attempts {
        match store.get_pod(&namespace, &name).await {
            Ok(Some(p)) => {
                if let Some(digest) = lookup::pod_image_id(&p) {
                    info!(pod = %name, image = ?lookup::pod_image(&p), digest = %digest, "probe resolved image digest");
                    let _ = tx.send(digest.to_string());
                    return;
                }
            }
            Ok(None) => {
                warn!(pod = %name, "probe pod disappeared");
                break;
            }
            Err(e) => debug!(pod = %name, attempt, error = %e, "probe pod read failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }
    counter!("registry_probe_abandoned_total", 1u64);
    warn!(pod = %name, attempts, "couldn't run catalog source probe pod; abandoning");
}

#[derive(Debug, Default)]
struct ProbeSlot {
    last_checked: Option<DateTime<Utc>>,
    in_flight: Option<ProbeHandle>,
}

/// Per-source probe bookkeeping. At most one probe is in flight per source.
pub struct FreshnessProber {
    lister: Arc<dyn Lister>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    slots: Mutex<FxHashMap<String, ProbeSlot>>,
}

impl FreshnessProber {
    pub fn new(lister: Arc<dyn Lister>, store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>, config: ReconcilerConfig) -> Self {
        Self { lister, store, clock, config, slots: Mutex::new(FxHashMap::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, ProbeSlot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the serving pod should be replaced because its tag moved.
    ///
    /// Never waits: a finished probe is compared against the serving pod's
    /// digest, an unfinished one counts as "no". When the poll interval has
    /// elapsed since both the last check and the serving pod's creation, a new
    /// probe is started; its result is only seen by a later call.
    ///
    /// Must be called within a Tokio runtime, since starting a probe spawns a task.
    pub fn needs_refresh(&self, source: &CatalogSource) -> bool {
        let interval = source.poll_interval();
        if interval.is_zero() {
            return false;
        }
        let serving = lookup::current_pods_with_image(self.lister.as_ref(), source).into_iter().next();
        let now = self.clock.now();
        let key = source.source_key();

        let mut slots = self.lock();
        let slot = slots.entry(key.clone()).or_default();

        let mut refresh = false;
        match slot.in_flight.as_mut().map(|h| (h.poll(), h.image() == source.spec.image)) {
            None | Some((ProbePoll::Pending, _)) => {}
            Some((ProbePoll::Ready(digest), true)) => {
                slot.in_flight = None;
                refresh = digest_moved(&key, serving.as_ref(), &digest);
            }
            Some((ProbePoll::Ready(_), false)) => {
                slot.in_flight = None;
                debug!(source = %key, "discarding digest probed for a previous image");
            }
            Some((ProbePoll::Abandoned, _)) => {
                slot.in_flight = None;
                debug!(source = %key, "probe ended without a digest");
            }
        }

        if slot.in_flight.is_none() {
            if let Some(pod) = serving.as_ref() {
                if gate_open(slot.last_checked, pod, now, interval) {
                    slot.last_checked = Some(now);
                    let ns = source.namespace().unwrap_or_default();
                    let handle = ProbeHandle::spawn(
                        Arc::clone(&self.store),
                        ns,
                        decorator::probe_pod(source),
                        self.config.probe_attempts,
                        self.config.probe_backoff,
                    );
                    slot.in_flight = Some(handle);
                    counter!("registry_probe_started_total", 1u64);
                    debug!(source = %key, budget = ?self.config.probe_budget(), "probe started");
                }
            }
        }
        refresh
    }

    /// Whether a probe is currently running for `source`.
    pub fn is_probing(&self, source: &CatalogSource) -> bool {
        self.lock().get(&source.source_key()).map(|s| s.in_flight.is_some()).unwrap_or(false)
    }

    /// Stop any probe for `source` and forget its check history.
    pub fn stop(&self, source: &CatalogSource) {
        if let Some(slot) = self.lock().remove(&source.source_key()) {
            if let Some(h) = slot.in_flight { h.stop(); }
        }
    }
}

impl Drop for FreshnessProber {
    fn drop(&mut self) {
        for (_, slot) in self.lock().drain() {
            if let Some(h) = slot.in_flight { h.stop(); }
        }
    }
}

fn gate_open(last_checked: Option<DateTime<Utc>>, serving: &Pod, now: DateTime<Utc>, interval: Duration) -> bool {
    let since_check = last_checked.map(|t| elapsed_between(t, now) > interval).unwrap_or(true);
    let since_deploy = serving
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| elapsed_between(t.0, now) > interval)
        .unwrap_or(false);
    since_check && since_deploy
}

fn digest_moved(key: &str, serving: Option<&Pod>, probed: &str) -> bool {
    match serving.and_then(lookup::pod_image_id) {
        Some(current) if current != probed => {
            counter!("registry_digest_drift_total", 1u64);
            info!(source = %key, current = %current, probed = %probed, "found new image digest");
            true
        }
        Some(_) => false,
        None => {
            debug!(source = %key, "serving pod has no digest yet; skipping comparison");
            false
        }
    }
}
