use super::Address;
use crate::{Result, RpcError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Any bidirectional byte stream the RPC layer can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased connection stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// Listening socket for either transport
pub enum Listener {
    Tcp(TcpListener),
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

impl Listener {
    /// Binds a listener to the given address
    ///
    /// For Unix domain sockets the parent directory is created when missing.
    /// An existing socket file is never removed: binding fails instead, so two
    /// servers cannot silently steal each other's path.
    pub async fn bind(address: &Address) -> Result<Self> {
        match address {
            Address::Network(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(|e| {
                    RpcError::Config(format!("Failed to bind TCP listener on {addr}: {e}"))
                })?;
                Ok(Listener::Tcp(listener))
            }
            Address::Unix(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let listener = UnixListener::bind(path).map_err(|e| {
                    RpcError::Config(format!(
                        "Failed to bind Unix listener on {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Address::UnnamedUnix => Err(RpcError::Config(
                "Cannot bind an unnamed Unix socket".to_string(),
            )),
        }
    }

    /// Address the listener is actually bound to (port 0 resolved)
    pub fn local_address(&self) -> Result<Address> {
        match self {
            Listener::Tcp(listener) => Ok(Address::Network(listener.local_addr()?)),
            Listener::Unix { path, .. } => Ok(Address::Unix(path.clone())),
        }
    }

    /// Accepts the next connection, returning the stream with its local and remote sides
    pub async fn accept(&self) -> Result<(BoxedStream, Address, Address)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let local = stream.local_addr()?;
                Ok((Box::new(stream), Address::Network(local), Address::Network(remote)))
            }
            Listener::Unix { listener, path } => {
                let (stream, peer) = listener.accept().await?;
                let remote = peer
                    .as_pathname()
                    .map(|p| Address::Unix(p.to_path_buf()))
                    .unwrap_or(Address::UnnamedUnix);
                Ok((Box::new(stream), Address::Unix(path.clone()), remote))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            } else {
                debug!(path = %path.display(), "Removed socket file");
            }
        }
    }
}

/// Connects to a server, returning the stream with its local and remote sides
///
/// Running out of `connect_timeout` is reported as an I/O `TimedOut` error so
/// callers treat it like any other failure to reach the server.
pub async fn connect(
    address: &Address,
    connect_timeout: Duration,
) -> Result<(BoxedStream, Address, Address)> {
    let attempt = async {
        match address {
            Address::Network(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                let local = stream.local_addr()?;
                let remote = stream.peer_addr()?;
                Ok::<_, RpcError>((
                    Box::new(stream) as BoxedStream,
                    Address::Network(local),
                    Address::Network(remote),
                ))
            }
            Address::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok((
                    Box::new(stream) as BoxedStream,
                    Address::UnnamedUnix,
                    Address::Unix(path.clone()),
                ))
            }
            Address::UnnamedUnix => Err(RpcError::Config(
                "Cannot connect to an unnamed Unix socket".to_string(),
            )),
        }
    };

    timeout(connect_timeout, attempt).await.map_err(|_| {
        RpcError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("Connection to {address} timed out"),
        ))
    })?
}
