use super::load_balancer::{self, LoadBalancer};
use super::naming;
use super::socket_map::SocketMap;
use super::{ChannelOptions, Controller};
use crate::network::Address;
use crate::protocol::{message, RpcFrame};
use crate::{Result, RpcError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

/// A client's view of one or more servers offering the same services
///
/// A channel is shared by every call the client makes; it owns the
/// connections and the load balancer. Calls go through
/// [`call_method`](Channel::call_method), usually via a typed stub.
pub struct Channel {
    servers: Vec<Address>,
    load_balancer: Box<dyn LoadBalancer>,
    options: ChannelOptions,
    sockets: SocketMap,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("servers", &self.servers)
            .field("load_balancer", &self.load_balancer.name())
            .field("options", &self.options)
            .finish()
    }
}

impl Channel {
    /// Creates a channel to `server`
    ///
    /// `server` is a single address or a naming url (`list://`, `file://`).
    /// `load_balancer` names the balancer used to pick among the servers.
    pub async fn init(server: &str, load_balancer: &str, options: ChannelOptions) -> Result<Self> {
        options.validate()?;

        if !load_balancer.trim().is_empty() && !naming::is_naming_url(server) {
            debug!(
                server,
                load_balancer, "Load balancer given for a single server, using a one-entry list"
            );
        }
        let servers = naming::resolve(server).await?;
        let load_balancer = load_balancer::from_name(load_balancer)?;

        info!(
            servers = servers.len(),
            protocol = %options.protocol,
            connection_type = %options.effective_connection_type(),
            load_balancer = load_balancer.name(),
            "Channel initialized"
        );
        Ok(Self {
            servers,
            load_balancer,
            sockets: SocketMap::new(options.clone()),
            options,
        })
    }

    pub fn servers(&self) -> &[Address] {
        &self.servers
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Calls `service.method` with an encoded request and returns the encoded response
    ///
    /// The outcome is also recorded in `cntl`: on success its response
    /// attachment is set, on failure `cntl.failed()` is true and
    /// `cntl.error_text()` describes the error.
    pub async fn call_method(
        &self,
        service: &str,
        method: &str,
        cntl: &mut Controller,
        payload: Bytes,
    ) -> Result<Bytes> {
        let started = Instant::now();
        let result = match self.options.timeout {
            Some(limit) => timeout(limit, self.call_with_retries(service, method, cntl, payload))
                .await
                .unwrap_or_else(|_| {
                    Err(RpcError::Timeout(format!(
                        "Reached timeout={}ms",
                        limit.as_millis()
                    )))
                }),
            None => self.call_with_retries(service, method, cntl, payload).await,
        };

        let latency = started.elapsed();
        match result {
            Ok((payload, attachment)) => {
                cntl.finish_ok(attachment, latency);
                Ok(payload)
            }
            Err(e) => {
                cntl.finish_err(e.to_string(), latency);
                Err(e)
            }
        }
    }

    /// Typed wrapper around [`call_method`](Channel::call_method)
    pub async fn call<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        cntl: &mut Controller,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = match message::encode(request) {
            Ok(payload) => payload,
            Err(e) => {
                cntl.finish_err(e.to_string(), Duration::ZERO);
                return Err(e);
            }
        };
        let response = self.call_method(service, method, cntl, payload).await?;
        match message::decode(&response) {
            Ok(response) => Ok(response),
            Err(e) => {
                let latency = cntl.latency();
                cntl.finish_err(e.to_string(), latency);
                Err(e)
            }
        }
    }

    async fn call_with_retries(
        &self,
        service: &str,
        method: &str,
        cntl: &mut Controller,
        payload: Bytes,
    ) -> Result<(Bytes, Bytes)> {
        let mut excluded = Vec::new();
        let mut retries = 0;
        loop {
            let index = self
                .load_balancer
                .select(self.servers.len(), &excluded)
                .ok_or_else(|| RpcError::Config("Channel has no servers".to_string()))?;
            let address = &self.servers[index];
            cntl.begin_attempt(address.clone());

            let frame = RpcFrame::request(
                service,
                method,
                cntl.log_id(),
                payload.clone(),
                cntl.request_attachment().clone(),
            );
            match self.attempt(address, frame, cntl).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && retries < self.options.max_retry => {
                    retries += 1;
                    cntl.record_retry();
                    debug!(server = %address, retries, error = %e, "Retrying call");
                    if !excluded.contains(&index) {
                        excluded.push(index);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        address: &Address,
        frame: RpcFrame,
        cntl: &mut Controller,
    ) -> Result<(Bytes, Bytes)> {
        let mut socket = self.sockets.checkout(address).await?;
        cntl.set_local_side(socket.local().clone());
        let response = socket.call(frame).await?;
        self.sockets.checkin(address, socket);
        response.into_result()
    }
}
