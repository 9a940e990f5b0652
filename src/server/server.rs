use super::connection::{ServerShared, serve_connection};
use super::{ServerOptions, Service};
use crate::network::{Address, Listener};
use crate::security::ConnectionTracker;
use crate::{Result, RpcError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// Pause after a failed accept so a persistent error does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

struct Running {
    shared: Arc<ServerShared>,
    listen_address: Address,
    accept_task: Option<JoinHandle<()>>,
}

/// RPC server hosting one or more services on a single listening address
///
/// # Examples
///
/// ```no_run
/// use echorpc::{EchoServiceImpl, Server, ServerOptions};
/// use echorpc::echo::EchoServiceHandler;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = Server::new();
///     server.add_service(EchoServiceHandler::new(EchoServiceImpl::new(true)))?;
///     server.start(&"127.0.0.1:8000".parse()?, ServerOptions::default()).await?;
///
///     let quit = echorpc::shutdown::install_quit_handler();
///     server.run_until_asked_to_quit(&quit).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    services: HashMap<String, Arc<dyn Service>>,
    shutdown_signal: CancellationToken,
    running: Option<Running>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            shutdown_signal: CancellationToken::new(),
            running: None,
        }
    }

    /// Registers a service under its name
    ///
    /// Fails if a service with the same name exists or the server is running.
    pub fn add_service<S: Service>(&mut self, service: S) -> Result<()> {
        if self.running.is_some() {
            return Err(RpcError::Config(
                "Cannot add a service to a running server".to_string(),
            ));
        }
        let name = service.name().to_string();
        if name.is_empty() {
            return Err(RpcError::Config("Service name must not be empty".to_string()));
        }
        if self.services.contains_key(&name) {
            return Err(RpcError::Config(format!("Service '{name}' is already registered")));
        }
        info!(service = %name, "Added service");
        self.services.insert(name, Arc::new(service));
        Ok(())
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the server listens on, with port 0 resolved
    pub fn listen_address(&self) -> Option<&Address> {
        self.running.as_ref().map(|r| &r.listen_address)
    }

    /// Number of client connections currently open
    pub fn connection_count(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| r.shared.tracker.active())
            .unwrap_or(0)
    }

    /// Returns a token that, once cancelled, makes `run_until_asked_to_quit` stop the server
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown_signal.clone()
    }

    /// Binds the address and starts accepting connections in the background
    pub async fn start(&mut self, address: &Address, options: ServerOptions) -> Result<()> {
        if self.running.is_some() {
            return Err(RpcError::Config("Server is already running".to_string()));
        }
        if self.services.is_empty() {
            return Err(RpcError::Config(
                "Cannot start a server without services".to_string(),
            ));
        }

        let listener = Listener::bind(address).await?;
        let listen_address = listener.local_address()?;

        let shared = Arc::new(ServerShared {
            services: self.services.clone(),
            tracker: ConnectionTracker::new(options.max_connections),
            options,
            logoff: CancellationToken::new(),
            hard_stop: CancellationToken::new(),
        });

        info!(
            address = %listen_address,
            services = self.services.len(),
            max_connections = shared.options.max_connections,
            idle_timeout_s = shared.options.idle_timeout.map(|d| d.as_secs()),
            "Server started"
        );

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        self.running = Some(Running {
            shared,
            listen_address,
            accept_task: Some(accept_task),
        });
        Ok(())
    }

    /// Stops accepting and enters logoff
    ///
    /// Requests arriving from now on are refused with a logoff error. Waits up
    /// to the configured logoff duration for clients to disconnect, then tells
    /// the remaining connections to close.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.as_ref() else {
            return Ok(());
        };
        let shared = &running.shared;
        if shared.logoff.is_cancelled() {
            return Ok(());
        }

        info!(
            connections = shared.tracker.active(),
            logoff_ms = shared.options.logoff.as_millis() as u64,
            "Server logging off"
        );
        shared.logoff.cancel();

        if !shared.tracker.wait_idle(shared.options.logoff).await {
            warn!(
                connections = shared.tracker.active(),
                "Logoff period over, closing remaining connections"
            );
        }
        shared.hard_stop.cancel();
        Ok(())
    }

    /// Waits for the accept loop and every connection task to finish after `stop`
    pub async fn join(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        if !running.shared.hard_stop.is_cancelled() {
            self.running = Some(running);
            return Err(RpcError::Config("Server must be stopped before join".to_string()));
        }

        if let Some(task) = running.accept_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Accept loop panicked");
            }
        }
        let metrics = running.shared.tracker.metrics();
        info!(
            address = %running.listen_address,
            total_connections = metrics.total_connections,
            "Server stopped"
        );
        Ok(())
    }

    /// Blocks until `quit` or the server's own shutdown signal fires, then stops and joins
    pub async fn run_until_asked_to_quit(&mut self, quit: &CancellationToken) -> Result<()> {
        if self.running.is_none() {
            return Err(RpcError::Config("Server is not running".to_string()));
        }

        tokio::select! {
            _ = quit.cancelled() => {
                info!("Received shutdown signal, stopping server");
            }
            _ = self.shutdown_signal.cancelled() => {
                info!("Received internal shutdown signal, stopping server");
            }
        }

        self.stop().await?;
        self.join().await
    }
}

/// Accepts connections until logoff, then waits for every connection task
async fn accept_loop(listener: Listener, shared: Arc<ServerShared>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shared.logoff.cancelled() => {
                info!("Stopped accepting connections");
                break;
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Connection task failed");
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, local, remote)) => {
                        let guard = match shared.tracker.try_acquire() {
                            Ok(guard) => guard,
                            Err(e) => {
                                warn!(%remote, error = %e, "Connection rejected");
                                continue;
                            }
                        };
                        info!(%remote, current = shared.tracker.active(), "Accepted connection");

                        let span = tracing::info_span!("connection", %remote);
                        connections.spawn(
                            serve_connection(stream, local, remote, Arc::clone(&shared), guard)
                                .instrument(span),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
    drop(listener);

    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Connection task failed");
        }
    }
}
