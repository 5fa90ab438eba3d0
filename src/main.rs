use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use demo_reset::{admin_router, init_logging, DemoReset, DemoSettings};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "demo-reset")]
#[command(about = "Restores a shared demo datastore from a clean snapshot when idle or stale")]
struct Cli {
    /// JSON settings file; `DEMO_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and serve the operator endpoints until Ctrl-C.
    Run,
    /// Restore the clean snapshot now, ignoring the policy.
    Reset {
        #[arg(long, default_value = "cli")]
        operator: String,
    },
    /// Print clocks, countdowns and snapshot health as JSON.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let settings = DemoSettings::load(cli.config.as_deref())?;
    let Some(demo) = DemoReset::open(settings)? else {
        return Ok(());
    };

    match cli.command {
        Command::Run => run(demo).await,
        Command::Reset { operator } => {
            let report = demo.force_reset(&operator).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status => {
            let status = demo.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

async fn run(demo: DemoReset) -> Result<()> {
    let listen_addr = demo.settings().listen_addr.clone();
    if demo.settings().operator_token.is_none() {
        warn!("DEMO_OPERATOR_TOKEN not set; POST /demo/reset is disabled");
    }

    demo.start().await?;

    // Operator requests never count as demo activity.
    let app = admin_router(demo.clone());
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!("demo reset listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {err}");
            }
        })
        .await;

    demo.shutdown().await?;
    served.context("admin server failed")
}
