use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use registry_core::{CatalogSource, SystemClock};
use registry_crd::{detect_api_version, get_new_storage_version, needs_storage_migration, parse_crd};
use registry_kubehub::{KubeObjectStore, Lister, ObjectStore, ReflectorLister};
use registry_reconciler::{GrpcRegistryReconciler, ReconcilerConfig, RegistryReconciler};
use registry_store::{MemoryCluster, Op};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "registryctl", version, about = "Catalog registry reconciler CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for sources that don't carry one
    #[arg(long = "ns", global = true, env = "REGISTRY_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// CRD manifest inspection
    Crd {
        #[command(subcommand)]
        command: CrdCommands,
    },
    /// Run one reconcile pass for a CatalogSource manifest and report health
    Reconcile {
        /// CatalogSource manifest (YAML or JSON)
        file: PathBuf,
        /// Reconcile against an empty in-memory cluster instead of the API server
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CrdCommands {
    /// Print the apiextensions version of a CRD manifest
    Version {
        file: PathBuf,
    },
    /// Decide whether replacing a CRD requires a storage migration
    Migrate {
        #[arg(long = "old")]
        old: PathBuf,
        #[arg(long = "new")]
        new: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("REGISTRY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REGISTRY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid REGISTRY_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_manifest(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct MigrateReport<'a> {
    old_api_version: &'a str,
    new_api_version: &'a str,
    migration_required: bool,
    new_storage_version: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileReport<'a> {
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    image: &'a str,
    healthy: bool,
    dry_run: bool,
    status: Option<&'a registry_core::RegistryServiceStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ops: Vec<String>,
}

fn render_op(op: &Op) -> String {
    match op {
        Op::Create { kind, namespace, name } => format!("+ {} {}/{}", kind, namespace, name),
        Op::Delete { kind, namespace, name } => format!("- {} {}/{}", kind, namespace, name),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Crd { command: CrdCommands::Version { file } } => {
            let manifest = read_manifest(&file)?;
            let version = detect_api_version(Some(manifest.as_str()))?;
            info!(file = %file.display(), version = %version, "crd version detected");
            match cli.output {
                Output::Human => println!("{}", version),
                Output::Json => println!("{}", serde_json::json!({ "apiVersion": version })),
            }
        }
        Commands::Crd { command: CrdCommands::Migrate { old, new } } => {
            let old_crd = parse_crd(Some(read_manifest(&old)?.as_str())).with_context(|| format!("old CRD {}", old.display()))?;
            let new_crd = parse_crd(Some(read_manifest(&new)?.as_str())).with_context(|| format!("new CRD {}", new.display()))?;
            let report = MigrateReport {
                old_api_version: old_crd.api_version(),
                new_api_version: new_crd.api_version(),
                migration_required: needs_storage_migration(&old_crd, &new_crd),
                new_storage_version: get_new_storage_version(&new_crd),
            };
            info!(crd = ?new_crd.name(), migration = report.migration_required, "storage migration decided");
            match cli.output {
                Output::Human => {
                    println!("migration required: {}", if report.migration_required { "yes" } else { "no" });
                    println!("new storage version: {}", report.new_storage_version.as_deref().unwrap_or("-"));
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::Reconcile { file, dry_run } => {
            let mut source: CatalogSource =
                serde_yaml::from_str(&read_manifest(&file)?).with_context(|| format!("decoding CatalogSource {}", file.display()))?;
            if source.metadata.namespace.is_none() {
                source.metadata.namespace = Some(cli.namespace.clone().unwrap_or_else(|| "default".to_string()));
            }
            let ns = source.metadata.namespace.clone().unwrap_or_default();
            let config = ReconcilerConfig::from_env();
            info!(source = %source.source_key(), image = %source.spec.image, dry_run, "reconcile invoked");

            let memory = dry_run.then(|| Arc::new(MemoryCluster::new(Arc::new(SystemClock))));
            let (lister, store): (Arc<dyn Lister>, Arc<dyn ObjectStore>) = match &memory {
                Some(m) => (m.clone() as Arc<dyn Lister>, m.clone() as Arc<dyn ObjectStore>),
                None => {
                    let client = registry_kubehub::get_kube_client().await?;
                    let lister = ReflectorLister::start(client.clone(), Some(&ns)).await?;
                    (Arc::new(lister) as Arc<dyn Lister>, Arc::new(KubeObjectStore::new(client)) as Arc<dyn ObjectStore>)
                }
            };
            let reconciler = GrpcRegistryReconciler::new(lister, store, Arc::new(SystemClock), config);

            if let Err(e) = reconciler.ensure_registry_server(&mut source).await {
                error!(error = ?e, kind = %e.kind(), name = %e.name(), "reconcile failed");
                return Err(e.into());
            }
            let healthy = reconciler.check_registry_server(&source);
            let ops: Vec<String> = memory.as_ref().map(|m| m.take_ops().iter().map(render_op).collect()).unwrap_or_default();
            let report = ReconcileReport {
                source: source.source_key(),
                display_name: source.spec.display_name.as_deref(),
                image: &source.spec.image,
                healthy,
                dry_run,
                status: source.registry_service_status(),
                ops,
            };
            match cli.output {
                Output::Human => {
                    for op in &report.ops {
                        println!("{}", op);
                    }
                    match report.display_name {
                        Some(d) => println!("source: {} ({})", report.source, d),
                        None => println!("source: {}", report.source),
                    }
                    println!("healthy: {}", report.healthy);
                    match report.status {
                        Some(s) => println!(
                            "service: {}.{}:{} ({}) created {}",
                            s.service_name,
                            s.service_namespace,
                            s.port,
                            s.protocol,
                            s.created_at.0.to_rfc3339()
                        ),
                        None => println!("service: -"),
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
    }

    Ok(())
}
