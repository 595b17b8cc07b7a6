use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use aesd_socket::{
    backend::{DeviceBackend, RingBackend, StoreBackend},
    cli::{BackendArg, Cli},
    server::{Server, ServerConfig},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let mut cli = Cli::parse();
    let listener = std::net::TcpListener::bind(cli.listen)
        .with_context(|| format!("failed to bind {}", cli.listen))?;

    // The runtime's threads would not survive the fork, so detach first.
    if cli.daemon {
        // daemon(3) changes into `/`.
        cli.data_file = std::path::absolute(&cli.data_file)?;
        cli.device = std::path::absolute(&cli.device)?;
        nix::unistd::daemon(false, false).context("failed to daemonize")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(serve(cli, listener))
}

async fn serve(cli: Cli, listener: std::net::TcpListener) -> Result<()> {
    listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(listener)?;
    let config = ServerConfig {
        marker_interval: Duration::from_secs(cli.marker_interval_secs),
        max_record_len: cli.max_record_len,
    };

    match cli.backend {
        BackendArg::Ring => {
            let backend = RingBackend::with_data_file(cli.data_file);
            run(Server::new(listener, backend, config)).await
        }
        BackendArg::Device => {
            let backend = DeviceBackend::new(cli.device);
            run(Server::new(listener, backend, config)).await
        }
    }
}

async fn run<B: StoreBackend>(server: Server<B>) -> Result<()> {
    let addr = server.local_addr()?;
    info!("aesdsocket listening on {}", addr);
    if let Err(err) = server.run_until_signal().await {
        warn!("aesdsocket exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
