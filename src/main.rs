use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kube::ResourceExt;
use kubenova_operator::controller::{self, KubeStore, ReconcilerConfig, ResourceStore, RetryPolicy};
use kubenova_operator::crd::KubeNova;
use kubenova_operator::Error;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// List the KubeNova resources in a namespace
    Info(InfoArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Port of the health and metrics server
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Requeue delay once every component is ready
    #[arg(long, env = "IDLE_REQUEUE_SECS", default_value_t = 300)]
    idle_requeue_secs: u64,

    /// Requeue delay while components are still rolling out
    #[arg(long, env = "SHORT_REQUEUE_SECS", default_value_t = 30)]
    short_requeue_secs: u64,

    /// Requeue delay after a failed pass
    #[arg(long, env = "ERROR_BACKOFF_SECS", default_value_t = 60)]
    error_backoff_secs: u64,
}

impl RunArgs {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            idle_requeue: Duration::from_secs(self.idle_requeue_secs),
            short_requeue: Duration::from_secs(self.short_requeue_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            status_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to list
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("KubeNova Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let store = KubeStore::new(client);
    let roots: Vec<KubeNova> = store.list(&args.namespace).await?;

    println!("Managed KubeNova resources: {}", roots.len());
    for kn in &roots {
        let (phase, url) = kn
            .status
            .as_ref()
            .map(|s| {
                (
                    s.phase.to_string(),
                    s.access_info
                        .as_ref()
                        .map(|a| a.web_url.clone())
                        .unwrap_or_default(),
                )
            })
            .unwrap_or_else(|| ("Unknown".to_string(), String::new()));
        println!("  {:<24} {:<10} {}", kn.name_any(), phase, url);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match kubenova_operator::telemetry::init_telemetry(&registry) {
        Some(otel_layer) => {
            registry.with(otel_layer).init();
            info!("OpenTelemetry tracing initialized");
        }
        None => {
            registry.init();
            info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
        }
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting KubeNova Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let config = args.reconciler_config();
    info!(
        "Requeue intervals: idle {:?}, short {:?}, error {:?}",
        config.idle_requeue, config.short_requeue, config.error_backoff
    );

    let state = Arc::new(controller::ControllerState { client, config });

    #[cfg(feature = "rest-api")]
    {
        let port = args.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = kubenova_operator::rest_api::run_server(port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    let result = controller::run_controller(state).await;

    // Flush any remaining traces
    kubenova_operator::telemetry::shutdown_telemetry();

    result
}
