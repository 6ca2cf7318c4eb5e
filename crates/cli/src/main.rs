use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use conflux_apply::{
    advance_status, collect_garbage, remove_work_resources, run_cycle, DesiredState, ManifestSet, PruneResult,
    ReconcileResult,
};
use conflux_core::{EngineConfig, MetadataPolicy, WorkStatus};
use conflux_kubehub::{fetch_api_versions, get_kube_client};
use conflux_persist::{SqliteStatusStore, StatusStore};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "confluxctl", version, about = "Converge a cluster onto a set of manifests")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Max in-flight per-resource operations (overrides CONFLUX_CONCURRENCY)
    #[arg(long = "concurrency", global = true)]
    concurrency: Option<usize>,

    /// ignore | labels-and-annotations (overrides CONFLUX_METADATA_POLICY)
    #[arg(long = "metadata-policy", global = true)]
    metadata_policy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the manageable resource types and their served versions
    Discover,
    /// Run one reconciliation cycle for a manifest file and record the status
    Apply {
        /// Multi-document YAML/JSON manifest file ("-" for stdin)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Name the status is recorded under
        #[arg(long = "work")]
        work: String,
    },
    /// Show the recorded status of a work
    Status {
        #[arg(long = "work")]
        work: String,
        /// Also show older records
        #[arg(long = "history", action = ArgAction::SetTrue)]
        history: bool,
    },
    /// Delete managed objects that the manifest file no longer names
    Prune {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Report what would be deleted without deleting
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete every managed object named by the manifest file, then forget
    /// the work's recorded status
    Teardown {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        #[arg(long = "work")]
        work: String,
    },
}

fn init_tracing() {
    let env = std::env::var("CONFLUX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CONFLUX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CONFLUX_METRICS_ADDR; expected host:port");
        }
    }
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = EngineConfig::from_env();
    if let Some(n) = cli.concurrency {
        cfg.concurrency = n.max(1);
    }
    if let Some(p) = cli.metadata_policy.as_deref() {
        cfg.metadata_policy = MetadataPolicy::from_str(p).map_err(|e| anyhow!(e))?;
    }
    Ok(cfg)
}

fn read_manifests(path: &PathBuf) -> Result<ManifestSet> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading manifests from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    Ok(ManifestSet::from_stream(&text))
}

#[derive(serde::Serialize)]
struct ResultRow {
    resource: String,
    updated: bool,
    error: Option<String>,
}

impl From<&ReconcileResult> for ResultRow {
    fn from(r: &ReconcileResult) -> Self {
        Self { resource: r.identifier.to_string(), updated: r.updated, error: r.err.as_ref().map(|e| e.to_string()) }
    }
}

#[derive(serde::Serialize)]
struct PruneRow {
    resource: String,
    deleted: bool,
    error: Option<String>,
}

impl From<&PruneResult> for PruneRow {
    fn from(r: &PruneResult) -> Self {
        Self { resource: r.identifier.to_string(), deleted: r.deleted, error: r.err.as_ref().map(|e| e.to_string()) }
    }
}

fn print_status(status: &WorkStatus) {
    for c in status.conditions.iter() {
        println!("{:<10} {:<8} {:<20} {}  {}", c.type_, c.status, c.reason, c.last_transition_time.to_rfc3339(), c.message);
    }
    if !status.manifest_conditions.is_empty() {
        println!();
        println!("{:<48} {:<8} {}", "RESOURCE", "APPLIED", "SINCE");
        for mc in status.manifest_conditions.iter() {
            let (st, since) = match mc.condition(conflux_core::CONDITION_APPLIED) {
                Some(c) => (c.status.to_string(), c.last_transition_time.to_rfc3339()),
                None => ("-".to_string(), "-".to_string()),
            };
            println!("{:<48} {:<8} {}", mc.identifier.to_string(), st, since);
        }
    }
}

fn print_prune(output: Output, rows: &[PruneResult], dry_run: bool) -> Result<()> {
    match output {
        Output::Human => {
            let verb = if dry_run { "would delete" } else { "deleted" };
            for r in rows {
                match &r.err {
                    Some(e) => println!("{:<48} failed: {}", r.identifier.to_string(), e),
                    None if r.deleted => println!("{:<48} {}", r.identifier.to_string(), verb),
                    None => println!("{:<48} unchanged", r.identifier.to_string()),
                }
            }
        }
        Output::Json => {
            let rows: Vec<PruneRow> = rows.iter().map(PruneRow::from).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = engine_config(&cli)?;

    match &cli.command {
        Commands::Discover => {
            info!("discover invoked");
            let client = get_kube_client().await?;
            let index = fetch_api_versions(&client, &cfg.ignore).await?;
            match cli.output {
                Output::Human => {
                    println!("{:<40} {:<28} {:<11} VERSIONS", "GROUP/RESOURCE", "KIND", "SCOPE");
                    for (group, resource, ty) in index.iter() {
                        let gr = if group.is_empty() { resource.to_string() } else { format!("{}/{}", group, resource) };
                        let scope = if ty.namespaced { "namespaced" } else { "cluster" };
                        println!("{:<40} {:<28} {:<11} {}", gr, ty.kind, scope, ty.versions.join(","));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&index)?),
            }
        }
        Commands::Apply { file, work } => {
            let set = read_manifests(file)?;
            info!(work = %work, manifests = set.len(), concurrency = cfg.concurrency, "apply invoked");
            let client = get_kube_client().await?;
            let store = SqliteStatusStore::open_default()?;
            let prior = store.get_status(work)?.unwrap_or_default();
            let results = match run_cycle(&client, &client, &set, &cfg).await {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, work = %work, "reconcile cycle failed");
                    return Err(e.into());
                }
            };
            let now = Utc::now();
            let status = advance_status(&prior, &results, now);
            store.put_status(work, &status, now)?;
            match cli.output {
                Output::Human => {
                    for r in results.iter() {
                        let outcome = match (&r.err, r.updated) {
                            (Some(e), _) => format!("failed: {}", e),
                            (None, true) => "configured".to_string(),
                            (None, false) => "unchanged".to_string(),
                        };
                        println!("{:<48} {}", r.identifier.to_string(), outcome);
                    }
                    println!();
                    print_status(&status);
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Report<'a> { results: Vec<ResultRow>, status: &'a WorkStatus }
                    let report = Report { results: results.iter().map(ResultRow::from).collect(), status: &status };
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            if status.applied().map(|c| !c.is_true()).unwrap_or(true) {
                warn!(work = %work, "work not fully applied");
            }
        }
        Commands::Status { work, history } => {
            let store = SqliteStatusStore::open_default()?;
            if *history {
                let records = store.history(work, None)?;
                match cli.output {
                    Output::Human => {
                        for rec in records.iter() {
                            println!("== recorded {}", rec.recorded_at.to_rfc3339());
                            print_status(&rec.status);
                            println!();
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&records)?),
                }
                return Ok(());
            }
            match store.get_status(work)? {
                Some(status) => match cli.output {
                    Output::Human => print_status(&status),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                },
                None => eprintln!("no status recorded for work {}", work),
            }
        }
        Commands::Prune { file, dry_run } => {
            let set = read_manifests(file)?;
            info!(dry_run = *dry_run, manifests = set.len(), "prune invoked");
            let client = get_kube_client().await?;
            let desired = set.fetch_desired()?;
            let index = fetch_api_versions(&client, &cfg.ignore).await?;
            let (results, scan) = collect_garbage(&desired, &index, &client, &cfg, *dry_run).await;
            for (target, e) in scan.failures.iter() {
                eprintln!("warning: could not list {}: {}", target, e);
            }
            print_prune(cli.output, &results, *dry_run)?;
        }
        Commands::Teardown { file, work } => {
            let set = read_manifests(file)?;
            info!(work = %work, manifests = set.len(), "teardown invoked");
            let client = get_kube_client().await?;
            let desired = set.fetch_desired()?;
            let index = fetch_api_versions(&client, &cfg.ignore).await?;
            let results = remove_work_resources(&desired, &index, &client, &cfg).await;
            print_prune(cli.output, &results, false)?;
            let failed = results.iter().filter(|r| r.err.is_some()).count();
            if failed == 0 {
                let store = SqliteStatusStore::open_default()?;
                let removed = store.delete_status(work)?;
                info!(work = %work, records = removed, "work status cleared");
            } else {
                warn!(work = %work, failed, "teardown incomplete; keeping recorded status");
            }
        }
    }

    Ok(())
}
