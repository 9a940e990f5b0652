use super::{ServerContext, ServerOptions, Service};
use crate::network::{Address, BoxedStream};
use crate::protocol::{Inbound, Protocol, RpcFrame, ServerCodec};
use crate::security::{ConnectionGuard, ConnectionTracker};
use crate::RpcError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{error::Elapsed, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Responses waiting for the writer of one connection
const RESPONSE_QUEUE: usize = 128;

/// State shared by the accept loop and every connection of a running server
pub(crate) struct ServerShared {
    pub services: HashMap<String, Arc<dyn Service>>,
    pub options: ServerOptions,
    pub tracker: Arc<ConnectionTracker>,
    /// Cancelled when the server stops accepting and starts refusing requests
    pub logoff: CancellationToken,
    /// Cancelled when the logoff period is over and connections must close
    pub hard_stop: CancellationToken,
}

/// Runs one request through its service and builds the response frame
pub(crate) async fn dispatch(
    shared: &ServerShared,
    inbound: Inbound,
    local: &Address,
    remote: &Address,
) -> RpcFrame {
    let Inbound { protocol, frame } = inbound;
    let correlation_id = frame.correlation_id();

    let Some(request) = frame.meta.request else {
        return RpcFrame::error(
            correlation_id,
            &RpcError::BadRequest("Frame carries no request meta".to_string()),
        );
    };

    if shared.logoff.is_cancelled() {
        debug!(%remote, service = %request.service, "Refusing request during logoff");
        return RpcFrame::error(correlation_id, &RpcError::Logoff);
    }

    let Some(service) = shared.services.get(&request.service) else {
        warn!(%remote, service = %request.service, "Request for unknown service");
        return RpcFrame::error(correlation_id, &RpcError::NoService(request.service));
    };

    let mut ctx = ServerContext::new(
        request.log_id,
        protocol,
        remote.clone(),
        local.clone(),
        frame.attachment,
    );
    match service.call_method(&request.method, &mut ctx, frame.payload).await {
        Ok(payload) => RpcFrame::response(correlation_id, payload, ctx.take_response_attachment()),
        Err(e) => {
            warn!(
                %remote,
                service = %request.service,
                method = %request.method,
                log_id = request.log_id,
                error = %e,
                "Request failed"
            );
            RpcFrame::error(correlation_id, &e)
        }
    }
}

async fn read_next<S>(frames: &mut S, idle_timeout: Option<Duration>) -> Result<Option<S::Item>, Elapsed>
where
    S: Stream + Unpin,
{
    match idle_timeout {
        Some(idle) => timeout(idle, frames.next()).await,
        None => Ok(frames.next().await),
    }
}

async fn write_response<S>(
    sink: &mut S,
    frame: RpcFrame,
    write_timeout: Duration,
) -> crate::Result<()>
where
    S: Sink<RpcFrame, Error = RpcError> + Unpin,
{
    timeout(write_timeout, sink.send(frame)).await.map_err(|_| {
        RpcError::Timeout(format!("Write timeout after {}ms", write_timeout.as_millis()))
    })?
}

/// Writes responses until the queue closes or a write fails
///
/// A response the codec refuses (too large, unserializable meta) is replaced
/// by an error response with the same correlation id. Any other failure ends
/// the writer and `closed` fires.
async fn write_responses<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<RpcFrame>,
    write_timeout: Duration,
    remote: Address,
    closed: CancellationToken,
) where
    S: Sink<RpcFrame, Error = RpcError> + Unpin,
{
    let _closed = closed.drop_guard();
    while let Some(frame) = rx.recv().await {
        let correlation_id = frame.correlation_id();
        let written = match write_response(&mut sink, frame, write_timeout).await {
            Err(e @ (RpcError::Protocol(_) | RpcError::Serialization(_))) => {
                warn!(%remote, correlation_id, error = %e, "Response could not be encoded");
                let error = RpcError::Protocol(format!("Response could not be encoded: {e}"));
                let fallback = RpcFrame::error(correlation_id, &error);
                write_response(&mut sink, fallback, write_timeout).await
            }
            other => other,
        };
        if let Err(e) = written {
            warn!(%remote, error = %e, "Failed to write response");
            break;
        }
    }
}

/// Serves one client connection until it closes, idles out, or the server stops
///
/// Requests on a `std` connection run concurrently, at most
/// `max_in_flight` at a time, and their responses are written as they
/// complete. HTTP requests are answered in arrival order. The connection is
/// closed as soon as its response writer fails.
pub(crate) async fn serve_connection(
    stream: BoxedStream,
    local: Address,
    remote: Address,
    shared: Arc<ServerShared>,
    _guard: ConnectionGuard,
) {
    let framed = Framed::new(stream, ServerCodec::new(shared.options.max_body_size));
    let (sink, mut frames) = framed.split();
    let (tx, rx) = mpsc::channel::<RpcFrame>(RESPONSE_QUEUE);

    let writer_closed = CancellationToken::new();
    let mut writer = tokio::spawn(
        write_responses(
            sink,
            rx,
            shared.options.write_timeout,
            remote.clone(),
            writer_closed.clone(),
        )
        .in_current_span(),
    );

    let max_in_flight = shared.options.max_in_flight.max(1);
    let mut in_flight = JoinSet::new();

    loop {
        let next = tokio::select! {
            _ = shared.hard_stop.cancelled() => {
                info!(%remote, "Closing connection, logoff period is over");
                break;
            }
            _ = writer_closed.cancelled() => {
                warn!(%remote, "Response writer stopped, closing connection");
                break;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_dispatch_failure(&remote, joined);
                continue;
            }
            next = read_next(&mut frames, shared.options.idle_timeout),
                if in_flight.len() < max_in_flight => next,
        };

        let inbound = match next {
            Err(_) => {
                info!(%remote, "Idle timeout, closing connection");
                break;
            }
            Ok(None) => {
                info!(%remote, "Client closed connection");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(%remote, error = %e, "Failed to read request");
                break;
            }
            Ok(Some(Ok(inbound))) => inbound,
        };

        match inbound.protocol {
            Protocol::Std => {
                let shared = Arc::clone(&shared);
                let tx = tx.clone();
                let local = local.clone();
                let remote = remote.clone();
                in_flight.spawn(
                    async move {
                        let response = dispatch(&shared, inbound, &local, &remote).await;
                        let _ = tx.send(response).await;
                    }
                    .in_current_span(),
                );
            }
            Protocol::Http => {
                let response = tokio::select! {
                    _ = shared.hard_stop.cancelled() => {
                        info!(%remote, "Closing connection, logoff period is over");
                        break;
                    }
                    response = dispatch(&shared, inbound, &local, &remote) => response,
                };
                if tx.send(response).await.is_err() {
                    break;
                }
            }
        }
    }

    // Requests already dispatched still get their answers unless the server
    // is force-closing or nothing can be written anymore.
    while !in_flight.is_empty() && !writer_closed.is_cancelled() {
        tokio::select! {
            _ = shared.hard_stop.cancelled() => break,
            _ = writer_closed.cancelled() => break,
            Some(joined) = in_flight.join_next() => log_dispatch_failure(&remote, joined),
        }
    }
    in_flight.shutdown().await;

    drop(tx);
    tokio::select! {
        _ = shared.hard_stop.cancelled() => writer.abort(),
        _ = &mut writer => return,
    }
    let _ = writer.await;
}

fn log_dispatch_failure(remote: &Address, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(%remote, error = %e, "Request handler panicked");
        }
    }
}
