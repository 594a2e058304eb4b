use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sandbox_server::sandbox_io_service::SandboxIoService;
use sandbox_server::{ServerError, serve};

#[derive(Parser)]
#[command(name = "sandbox-server")]
#[command(about = "Sandbox I/O server backed by the local filesystem.")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "50051")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    address: String,

    /// Directory commands run in and relative paths resolve against
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Identifier reported to clients (defaults to one derived from the hostname)
    #[arg(long)]
    sandbox_id: Option<String>,

    /// Cap on captured command output, in bytes
    #[arg(long)]
    max_output_bytes: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("sandbox={log_level},sandbox_server={log_level}"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let working_dir = match args.working_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let mut service = SandboxIoService::new(working_dir)?;
    if let Some(sandbox_id) = args.sandbox_id {
        service = service.with_sandbox_id(sandbox_id);
    }
    if let Some(limit) = args.max_output_bytes {
        service = service.with_max_output_bytes(limit);
    }

    let addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .map_err(|e| ServerError::InvalidAddress(format!("{}:{}: {e}", args.address, args.port)))?;

    info!("Starting sandbox server on {}", addr);
    info!("Sandbox id: {}", service.sandbox_id());
    info!("Working directory: {}", service.working_dir().display());

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let _signal_task: tokio::task::JoinHandle<()> = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        warn!("Received Ctrl+C, shutting down gracefully...");
        let _ = tx.send(());
    });

    serve(service, addr, async {
        rx.await.ok();
    })
    .await?;

    info!("Sandbox server shut down gracefully");
    Ok(())
}
