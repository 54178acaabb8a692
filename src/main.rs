use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use patchbay::api::{self, AppState};
use patchbay::component::ComponentRegistry;
use patchbay::config::RuntimeConfig;
use patchbay::logger::init_tracing;
use patchbay::metrics::MetricsCollector;
use patchbay::runtime::Runtime;
use patchbay::schema::write_schemas;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "patchbay",
    about = "Live-reconfigurable dataflow runtime for media pipelines",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the runtime and its control surface
    Run(RunArgs),

    /// Emit JSON-Schema for every registered component
    Schema(SchemaArgs),

    /// Print the component table
    Components,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Bind address override (default from PATCHBAY_ADDR, then 0.0.0.0:8000)
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        RunArgs {
            addr: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Output directory for the schema files
    #[arg(long, default_value = "schemas")]
    out_dir: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args).await,
        Commands::Schema(args) => {
            let registry = ComponentRegistry::with_builtins();
            write_schemas(&registry, &args.out_dir)?;
            println!("Schemas written to {}", args.out_dir.display());
            Ok(())
        }
        Commands::Components => {
            let registry = ComponentRegistry::with_builtins();
            for descriptor in registry.list() {
                let inputs: Vec<String> = descriptor
                    .inputs
                    .iter()
                    .map(|(slot, ty)| format!("{slot}:{ty}"))
                    .collect();
                let outputs: Vec<String> = descriptor
                    .outputs
                    .iter()
                    .map(|(slot, ty)| format!("{slot}:{ty}"))
                    .collect();
                println!(
                    "{:<12} {:<8} in[{}] out[{}]",
                    descriptor.name,
                    format!("{:?}", descriptor.kind).to_lowercase(),
                    inputs.join(", "),
                    outputs.join(", ")
                );
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env();
    init_tracing(&args.log_level, config.log_dir.clone())?;

    let registry = Arc::new(ComponentRegistry::with_builtins());
    let runtime = Runtime::new(registry, config.runtime_options());
    let metrics = MetricsCollector::new(runtime.clone(), config.metrics_interval);
    let sampler = metrics.clone().spawn();

    let addr = args.addr.unwrap_or(config.bind_addr);
    let app = api::router(AppState {
        runtime: runtime.clone(),
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("patchbay control surface listening on http://{addr}");
    println!("patchbay control surface listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("\nShutting down…");
    runtime.stop_all().await;
    sampler.abort();
    info!("patchbay stopped");
    Ok(())
}
