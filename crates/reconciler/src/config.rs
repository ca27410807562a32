use std::time::Duration;

const DEFAULT_PROBE_ATTEMPTS: u32 = 10;
const DEFAULT_PROBE_BACKOFF: Duration = Duration::from_secs(10);

/// Tunables for the registry reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Reads of a probe pod before giving up on seeing its digest.
    pub probe_attempts: u32,
    /// Pause between probe pod reads.
    pub probe_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { probe_attempts: DEFAULT_PROBE_ATTEMPTS, probe_backoff: DEFAULT_PROBE_BACKOFF }
    }
}

impl ReconcilerConfig {
    /// Defaults overridden by `REGISTRY_PROBE_ATTEMPTS` and `REGISTRY_PROBE_BACKOFF_SECS`.
    pub fn from_env() -> Self {
        let probe_attempts = std::env::var("REGISTRY_PROBE_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PROBE_ATTEMPTS);
        let probe_backoff = std::env::var("REGISTRY_PROBE_BACKOFF_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROBE_BACKOFF);
        Self { probe_attempts, probe_backoff }
    }

    /// Upper bound on how long a single probe can run.
    pub fn probe_budget(&self) -> Duration {
        self.probe_backoff.saturating_mul(self.probe_attempts.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ten_by_ten_seconds() {
        let cfg = ReconcilerConfig::default();
        assert_eq!(cfg.probe_attempts, 10);
        assert_eq!(cfg.probe_backoff, Duration::from_secs(10));
        assert_eq!(cfg.probe_budget(), Duration::from_secs(90));
    }
}
