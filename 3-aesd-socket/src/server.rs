use std::{fmt, future::Future, net::SocketAddr, pin::Pin, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    signal::unix::{Signal, SignalKind, signal},
    task::{JoinError, JoinSet},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{BackendKind, StoreBackend},
    command_log::CommandLog,
    marker::{self, DEFAULT_MARKER_INTERVAL},
    protocol::DEFAULT_MAX_RECORD_LEN,
    worker,
};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Period of the timestamp marker. Only used with an in-process ring.
    pub marker_interval: Duration,
    /// Longest record a connection may send, terminator included.
    pub max_record_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            marker_interval: DEFAULT_MARKER_INTERVAL,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Listening,
    ShuttingDown,
    Draining,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Listening => "listening",
            SupervisorState::ShuttingDown => "shutting down",
            SupervisorState::Draining => "draining",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Accepts connections and runs one worker task per client against a shared
/// [`CommandLog`].
pub struct Server<B> {
    listener: TcpListener,
    log: Arc<CommandLog<B>>,
    config: ServerConfig,
}

impl<B: StoreBackend> Server<B> {
    pub fn new(listener: TcpListener, backend: B, config: ServerConfig) -> Self {
        Self {
            listener,
            log: Arc::new(CommandLog::new(backend)),
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The log served by this server.
    pub fn log(&self) -> Arc<CommandLog<B>> {
        Arc::clone(&self.log)
    }

    /// Serves until `shutdown` completes, then cancels and joins every task
    /// and tears the backend down.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            log,
            config,
        } = self;
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        if log.kind() == BackendKind::InProcess {
            tasks.spawn(marker::run(
                Arc::clone(&log),
                config.marker_interval,
                cancel.child_token(),
            ));
        }

        let mut state = SupervisorState::Listening;
        info!(%state, "supervisor started");
        loop {
            reap_finished(&mut tasks);
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    let accepted =
                        handle_accept_result(accept_result, &log, &cancel, &config, &mut tasks);
                    if !accepted && wait_after_accept_error(shutdown.as_mut()).await {
                        break;
                    }
                }
            }
        }

        transition(&mut state, SupervisorState::ShuttingDown);
        drop(listener);
        cancel.cancel();

        transition(&mut state, SupervisorState::Draining);
        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }

        if let Err(err) = log.teardown().await {
            warn!(error = ?err, "failed to tear down store");
        }
        transition(&mut state, SupervisorState::Stopped);

        Ok(())
    }

    /// Serves until SIGINT or SIGTERM.
    pub async fn run_until_signal(self) -> Result<()> {
        let terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        self.run_until(termination_signal(terminate)).await
    }
}

async fn termination_signal(mut terminate: Signal) {
    select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        }
        _ = terminate.recv() => {}
    }
    info!("Caught signal, exiting");
}

fn transition(state: &mut SupervisorState, next: SupervisorState) {
    info!(from = %state, to = %next, "supervisor state change");
    *state = next;
}

/// Returns `false` when the accept failed.
fn handle_accept_result<B: StoreBackend>(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    log: &Arc<CommandLog<B>>,
    cancel: &CancellationToken,
    config: &ServerConfig,
    tasks: &mut JoinSet<()>,
) -> bool {
    match result {
        Ok((stream, peer)) => {
            spawn_worker(stream, peer, log, cancel, config, tasks);
            true
        }
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            false
        }
    }
}

/// Pauses after a failed accept so errors such as `EMFILE` do not spin the
/// loop. Returns `true` if `shutdown` completed during the pause.
async fn wait_after_accept_error<F>(shutdown: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    select! {
        _ = shutdown => true,
        _ = time::sleep(ACCEPT_ERROR_BACKOFF) => false,
    }
}

fn spawn_worker<B: StoreBackend>(
    stream: TcpStream,
    peer: SocketAddr,
    log: &Arc<CommandLog<B>>,
    cancel: &CancellationToken,
    config: &ServerConfig,
    tasks: &mut JoinSet<()>,
) {
    let log = Arc::clone(log);
    let cancel = cancel.child_token();
    let max_record_len = config.max_record_len;
    tasks.spawn(async move {
        if let Err(err) = worker::handle_connection(stream, peer, log, cancel, max_record_len).await
        {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        log_task_result(result);
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(err) if err.is_panic() => error!(error = ?err, "task panicked"),
        Err(err) => debug!(error = ?err, "task cancelled"),
    }
}
