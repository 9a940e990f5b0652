use super::ChannelOptions;
use crate::network::{self, Address, BoxedStream};
use crate::protocol::{ErrorCode, HttpClientCodec, Protocol, RpcCodec, RpcFrame};
use crate::{Result, RpcError};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, FramedRead, FramedWrite};
use tracing::{debug, warn};

type Pending = Mutex<HashMap<u64, oneshot::Sender<RpcFrame>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcFrame>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_logoff(frame: &RpcFrame) -> bool {
    frame
        .meta
        .response
        .as_ref()
        .is_some_and(|r| r.error_code == ErrorCode::Logoff.as_i32())
}

/// A `std` connection shared by concurrent calls
///
/// Requests are written through one writer; a background task reads
/// responses and hands each to the caller waiting on its correlation id.
pub(crate) struct MuxConnection {
    writer: tokio::sync::Mutex<FramedWrite<WriteHalf<BoxedStream>, RpcCodec>>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    broken: Arc<AtomicBool>,
    local: Address,
    remote: Address,
    reader: JoinHandle<()>,
}

/// Removes a pending call when its future completes or is dropped
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

impl MuxConnection {
    pub async fn connect(address: &Address, options: &ChannelOptions) -> Result<Self> {
        let (stream, local, remote) = network::connect(address, options.connect_timeout).await?;
        let (read_half, write_half) = tokio::io::split(stream);

        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let broken = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            FramedRead::new(read_half, RpcCodec::new(options.max_body_size)),
            Arc::clone(&pending),
            Arc::clone(&broken),
            remote.clone(),
        ));

        debug!(%remote, %local, "Connected");
        Ok(Self {
            writer: tokio::sync::Mutex::new(FramedWrite::new(
                write_half,
                RpcCodec::new(options.max_body_size),
            )),
            pending,
            next_id: AtomicU64::new(1),
            broken,
            local,
            remote,
            reader,
        })
    }

    pub fn local(&self) -> &Address {
        &self.local
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub async fn call(&self, mut frame: RpcFrame) -> Result<RpcFrame> {
        if self.is_broken() {
            return Err(RpcError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        frame.meta.correlation_id = id;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        // The reader marks the connection broken before clearing waiters.
        if self.is_broken() {
            return Err(RpcError::ConnectionClosed);
        }

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(frame).await {
                if matches!(e, RpcError::Io(_)) {
                    self.broken.store(true, Ordering::Release);
                }
                return Err(e);
            }
        }

        rx.await.map_err(|_| RpcError::ConnectionClosed)
    }
}

impl Drop for MuxConnection {
    fn drop(&mut self) {
        self.reader.abort();
        debug!(remote = %self.remote, "Connection dropped");
    }
}

async fn read_responses(
    mut frames: FramedRead<ReadHalf<BoxedStream>, RpcCodec>,
    pending: Arc<Pending>,
    broken: Arc<AtomicBool>,
    remote: Address,
) {
    while let Some(result) = frames.next().await {
        match result {
            Ok(frame) => {
                if is_logoff(&frame) {
                    broken.store(true, Ordering::Release);
                }
                let id = frame.correlation_id();
                match lock(&pending).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => debug!(%remote, id, "Dropping response of an abandoned call"),
                }
            }
            Err(e) => {
                warn!(%remote, error = %e, "Failed to read response");
                break;
            }
        }
    }

    broken.store(true, Ordering::Release);
    lock(&pending).clear();
    debug!(%remote, "Connection closed");
}

/// An HTTP/1.1 connection serving one call at a time
pub(crate) struct HttpConnection {
    framed: Framed<BoxedStream, HttpClientCodec>,
    local: Address,
    broken: bool,
}

impl HttpConnection {
    pub async fn connect(address: &Address, options: &ChannelOptions) -> Result<Self> {
        let (stream, local, remote) = network::connect(address, options.connect_timeout).await?;
        debug!(%remote, %local, "Connected");
        Ok(Self {
            framed: Framed::new(
                stream,
                HttpClientCodec::new(remote.to_string(), options.max_body_size),
            ),
            local,
            broken: false,
        })
    }

    pub async fn call(&mut self, frame: RpcFrame) -> Result<RpcFrame> {
        if let Err(e) = self.framed.send(frame).await {
            self.broken = true;
            return Err(e);
        }
        match self.framed.next().await {
            Some(Ok(frame)) => {
                self.broken = is_logoff(&frame);
                Ok(frame)
            }
            Some(Err(e)) => {
                self.broken = true;
                Err(e)
            }
            None => {
                self.broken = true;
                Err(RpcError::ConnectionClosed)
            }
        }
    }
}

/// A connection checked out for one call
pub(crate) enum ClientSocket {
    Std(Arc<MuxConnection>),
    Http(HttpConnection),
}

impl ClientSocket {
    pub async fn connect(address: &Address, options: &ChannelOptions) -> Result<Self> {
        match options.protocol {
            Protocol::Std => Ok(ClientSocket::Std(Arc::new(
                MuxConnection::connect(address, options).await?,
            ))),
            Protocol::Http => Ok(ClientSocket::Http(
                HttpConnection::connect(address, options).await?,
            )),
        }
    }

    pub fn local(&self) -> &Address {
        match self {
            ClientSocket::Std(conn) => conn.local(),
            ClientSocket::Http(conn) => &conn.local,
        }
    }

    /// Broken sockets are closed instead of going back to a pool
    pub fn is_broken(&self) -> bool {
        match self {
            ClientSocket::Std(conn) => conn.is_broken(),
            ClientSocket::Http(conn) => conn.broken,
        }
    }

    pub async fn call(&mut self, frame: RpcFrame) -> Result<RpcFrame> {
        match self {
            ClientSocket::Std(conn) => conn.call(frame).await,
            ClientSocket::Http(conn) => conn.call(frame).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Listener;
    use crate::protocol::RpcMeta;
    use bytes::Bytes;

    async fn spawn_reversing_server() -> Address {
        // Answers requests in reverse order of arrival, two at a time.
        let listener = Listener::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
        let address = listener.local_address().unwrap();
        tokio::spawn(async move {
            let (stream, _, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, RpcCodec::default());
            let first = framed.next().await.unwrap().unwrap();
            let second = framed.next().await.unwrap().unwrap();
            for req in [second, first] {
                let reply = RpcFrame::response(req.correlation_id(), req.payload, req.attachment);
                framed.send(reply).await.unwrap();
            }
        });
        address
    }

    #[tokio::test]
    async fn test_mux_routes_out_of_order_responses() {
        let address = spawn_reversing_server().await;
        let conn = MuxConnection::connect(&address, &ChannelOptions::default())
            .await
            .unwrap();

        let a = RpcFrame::request("S", "M", 1, Bytes::from_static(b"a"), Bytes::new());
        let b = RpcFrame::request("S", "M", 2, Bytes::from_static(b"b"), Bytes::new());
        let (ra, rb) = tokio::join!(conn.call(a), conn.call(b));

        assert_eq!(&ra.unwrap().payload[..], b"a");
        assert_eq!(&rb.unwrap().payload[..], b"b");
        assert!(lock(&conn.pending).is_empty());
    }

    #[tokio::test]
    async fn test_mux_fails_waiters_on_close() {
        let listener = Listener::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
        let address = listener.local_address().unwrap();
        tokio::spawn(async move {
            let (stream, _, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, RpcCodec::default());
            let _ = framed.next().await;
        });

        let conn = MuxConnection::connect(&address, &ChannelOptions::default())
            .await
            .unwrap();
        let frame = RpcFrame::request("S", "M", 0, Bytes::new(), Bytes::new());
        let result = conn.call(frame.clone()).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(conn.is_broken());
        assert!(matches!(conn.call(frame).await, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_logoff_response_breaks_socket() {
        let listener = Listener::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
        let address = listener.local_address().unwrap();
        tokio::spawn(async move {
            let (stream, _, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, RpcCodec::default());
            let req = framed.next().await.unwrap().unwrap();
            let reply = RpcFrame::error(req.correlation_id(), &RpcError::Logoff);
            framed.send(reply).await.unwrap();
            let _ = framed.next().await;
        });

        let mut socket = ClientSocket::connect(&address, &ChannelOptions::default())
            .await
            .unwrap();
        let reply = socket
            .call(RpcFrame::request("S", "M", 0, Bytes::new(), Bytes::new()))
            .await
            .unwrap();
        assert!(matches!(reply.into_result(), Err(RpcError::Logoff)));
        assert!(socket.is_broken());
    }

    #[tokio::test]
    async fn test_http_503_logoff_breaks_socket() {
        let listener = Listener::bind(&"127.0.0.1:0".parse().unwrap()).await.unwrap();
        let address = listener.local_address().unwrap();
        tokio::spawn(async move {
            let (stream, _, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, crate::protocol::HttpServerCodec::new(1024));
            let _req = framed.next().await.unwrap().unwrap();
            framed.send(RpcFrame::error(0, &RpcError::Logoff)).await.unwrap();
            let _ = framed.next().await;
        });

        let options = ChannelOptions::default().with_protocol(Protocol::Http);
        let mut socket = ClientSocket::connect(&address, &options).await.unwrap();
        let reply = socket
            .call(RpcFrame::request("S", "M", 0, Bytes::new(), Bytes::new()))
            .await
            .unwrap();
        let result = reply.into_result();
        assert!(matches!(result, Err(RpcError::Logoff)));
        assert!(result.unwrap_err().is_retryable());
        assert!(socket.is_broken());
    }

    #[test]
    fn test_is_logoff() {
        let ok = RpcFrame::response(1, Bytes::new(), Bytes::new());
        assert!(!is_logoff(&ok));
        assert!(is_logoff(&RpcFrame::error(1, &RpcError::Logoff)));
        let request = RpcFrame {
            meta: RpcMeta::default(),
            payload: Bytes::new(),
            attachment: Bytes::new(),
        };
        assert!(!is_logoff(&request));
    }
}
