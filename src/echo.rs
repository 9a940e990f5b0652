//! The echo service: request and response messages, the server-side
//! implementation and the client stub

use crate::client::{Channel, Controller};
use crate::protocol::message;
use crate::server::{ServerContext, Service};
use crate::{Result, RpcError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const ECHO_SERVICE: &str = "EchoService";
pub const ECHO_METHOD: &str = "Echo";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
    pub message: String,
}

impl EchoRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub message: String,
}

/// Server-side definition of the echo service
#[async_trait]
pub trait EchoService: Send + Sync + 'static {
    async fn echo(&self, ctx: &mut ServerContext, request: EchoRequest) -> Result<EchoResponse>;
}

/// Exposes an [`EchoService`] to a [`Server`](crate::Server) under the name `EchoService`
pub struct EchoServiceHandler<T> {
    inner: T,
}

impl<T: EchoService> EchoServiceHandler<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: EchoService> Service for EchoServiceHandler<T> {
    fn name(&self) -> &str {
        ECHO_SERVICE
    }

    async fn call_method(
        &self,
        method: &str,
        ctx: &mut ServerContext,
        payload: Bytes,
    ) -> Result<Bytes> {
        match method {
            ECHO_METHOD => {
                let request: EchoRequest = message::decode(&payload)
                    .map_err(|e| RpcError::BadRequest(format!("Invalid EchoRequest: {e}")))?;
                let response = self.inner.echo(ctx, request).await?;
                message::encode(&response)
            }
            other => Err(RpcError::NoMethod(format!("{ECHO_SERVICE}.{other}"))),
        }
    }
}

/// Echoes the message back, and the attachment too when enabled
#[derive(Debug, Clone)]
pub struct EchoServiceImpl {
    echo_attachment: bool,
}

impl EchoServiceImpl {
    pub fn new(echo_attachment: bool) -> Self {
        Self { echo_attachment }
    }
}

impl Default for EchoServiceImpl {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl EchoService for EchoServiceImpl {
    async fn echo(&self, ctx: &mut ServerContext, request: EchoRequest) -> Result<EchoResponse> {
        let attachment = ctx.request_attachment().clone();
        info!(
            log_id = ctx.log_id(),
            remote = %ctx.remote_side(),
            local = %ctx.local_side(),
            message = %request.message,
            attachment = %String::from_utf8_lossy(&attachment),
            "Received request"
        );

        if self.echo_attachment {
            ctx.set_response_attachment(attachment);
        }
        Ok(EchoResponse {
            message: request.message,
        })
    }
}

/// Client stub calling `EchoService` through a [`Channel`]
#[derive(Debug, Clone, Copy)]
pub struct EchoServiceStub<'a> {
    channel: &'a Channel,
}

impl<'a> EchoServiceStub<'a> {
    pub fn new(channel: &'a Channel) -> Self {
        Self { channel }
    }

    pub async fn echo(&self, cntl: &mut Controller, request: &EchoRequest) -> Result<EchoResponse> {
        self.channel
            .call(ECHO_SERVICE, ECHO_METHOD, cntl, request)
            .await
    }
}
