use crate::network::Address;
use crate::protocol::Protocol;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A named collection of methods a server can dispatch to
///
/// Implementations receive the encoded request payload and return the
/// encoded response payload. Typed services such as
/// [`EchoServiceHandler`](crate::echo::EchoServiceHandler) do the decoding.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Name clients use to address this service
    fn name(&self) -> &str;

    /// Runs `method` on the payload
    ///
    /// Unknown methods must fail with [`RpcError::NoMethod`](crate::RpcError::NoMethod).
    async fn call_method(
        &self,
        method: &str,
        ctx: &mut ServerContext,
        payload: Bytes,
    ) -> Result<Bytes>;
}

/// Per-request information handed to a service
#[derive(Debug, Clone)]
pub struct ServerContext {
    log_id: u64,
    protocol: Protocol,
    remote_side: Address,
    local_side: Address,
    request_attachment: Bytes,
    response_attachment: Bytes,
}

impl ServerContext {
    pub fn new(
        log_id: u64,
        protocol: Protocol,
        remote_side: Address,
        local_side: Address,
        request_attachment: Bytes,
    ) -> Self {
        Self {
            log_id,
            protocol,
            remote_side,
            local_side,
            request_attachment,
            response_attachment: Bytes::new(),
        }
    }

    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn remote_side(&self) -> &Address {
        &self.remote_side
    }

    pub fn local_side(&self) -> &Address {
        &self.local_side
    }

    /// Raw bytes the client sent next to the message
    pub fn request_attachment(&self) -> &Bytes {
        &self.request_attachment
    }

    /// Raw bytes to send back next to the response message
    pub fn set_response_attachment(&mut self, attachment: Bytes) {
        self.response_attachment = attachment;
    }

    pub fn response_attachment(&self) -> &Bytes {
        &self.response_attachment
    }

    pub(crate) fn take_response_attachment(&mut self) -> Bytes {
        std::mem::take(&mut self.response_attachment)
    }
}
