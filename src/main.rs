//! clusterops - converge container clusters on a declared spec

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::info;

use clusterops::client::HttpContainerApi;
use clusterops::config::ReconcilerConfig;
use clusterops::controller::{ReconcileOutcome, Reconciler};
use clusterops::model::{ClusterManifest, ResourceIdentity};
use clusterops::planner::plan_summary;
use clusterops::telemetry::{init_tracing, TelemetryConfig};

/// clusterops - operation orchestration for remotely provisioned clusters
#[derive(Parser, Debug)]
#[command(name = "clusterops", version, about, long_about = None)]
struct Cli {
    /// Reconciler configuration file (YAML)
    #[arg(long, global = true, env = "CLUSTEROPS_CONFIG")]
    config: Option<PathBuf>,

    /// Project used when an identifier or manifest does not name one
    #[arg(long, global = true, env = "CLUSTEROPS_PROJECT")]
    project: Option<String>,

    /// Control-plane API endpoint
    #[arg(long, global = true, env = "CLUSTEROPS_ENDPOINT")]
    endpoint: Option<String>,

    /// OAuth access token
    #[arg(long, global = true, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update a cluster to match a manifest
    Apply(ApplyArgs),

    /// Show the steps `apply` would run, without running them
    Plan {
        /// Cluster manifest (YAML)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },

    /// Delete a cluster
    Delete {
        /// `{location}/{name}` or `{project}/{location}/{name}`
        id: String,
    },

    /// Print a cluster's current state as YAML
    Get {
        /// `{location}/{name}` or `{project}/{location}/{name}`
        id: String,
    },
}

/// Apply arguments
#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Cluster manifest (YAML)
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Budget for the whole apply in seconds
    #[arg(long, default_value = "3600")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TelemetryConfig {
        json: cli.json_logs,
        filter: None,
    })?;

    let mut config = match &cli.config {
        Some(path) => ReconcilerConfig::from_yaml_file(path)?,
        None => ReconcilerConfig::default(),
    };
    if cli.project.is_some() {
        config.default_project = cli.project.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.api_endpoint = endpoint.clone();
    }

    let api = Arc::new(HttpContainerApi::from_config(&config, cli.token.clone())?);
    let default_project = config.default_project.clone();
    let reconciler = Reconciler::new(api, config);

    match cli.command {
        Commands::Apply(args) => {
            let manifest = load_manifest(&args.file).await?;
            let identity = manifest.identity(default_project.as_deref())?;
            info!(cluster = %identity, "applying manifest");

            let outcome = reconciler
                .reconcile(
                    &identity,
                    &manifest.spec,
                    Duration::from_secs(args.timeout_secs),
                )
                .await;
            report(&identity, outcome)
        }
        Commands::Plan { file } => {
            let manifest = load_manifest(&file).await?;
            let identity = manifest.identity(default_project.as_deref())?;
            match reconciler.plan(&identity, &manifest.spec).await {
                Ok(steps) => {
                    println!("{identity}: {}", plan_summary(&steps));
                    Ok(())
                }
                Err(e) if e.is_not_found() => {
                    manifest.spec.validate_create(&identity)?;
                    println!("{identity}: does not exist, apply will create it");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Delete { id } => {
            let identity = ResourceIdentity::parse(&id, default_project.as_deref())?;
            reconciler.delete(&identity).await?;
            println!("{identity}: deleted");
            Ok(())
        }
        Commands::Get { id } => {
            let identity = ResourceIdentity::parse(&id, default_project.as_deref())?;
            let observed = reconciler.get(&identity).await?;
            print!("{}", serde_yaml::to_string(&observed)?);
            Ok(())
        }
    }
}

async fn load_manifest(path: &Path) -> anyhow::Result<ClusterManifest> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    ClusterManifest::from_yaml(&content)
        .with_context(|| format!("failed to parse manifest {}", path.display()))
}

fn report(identity: &ResourceIdentity, outcome: ReconcileOutcome) -> anyhow::Result<()> {
    println!(
        "{identity}: {} of {} steps applied",
        outcome.applied_steps, outcome.planned_steps
    );
    if let Some(state) = &outcome.final_state {
        println!(
            "{identity}: status {} master {} nodes {}",
            state.status, state.master_version, state.node_version
        );
    }
    match outcome.failure {
        Some(failure) => Err(anyhow::anyhow!("{identity}: {failure}")),
        None => Ok(()),
    }
}
