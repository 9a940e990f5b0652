use crate::protocol::ErrorCode;
use crate::security::{ConnectionError, SizeError};
use thiserror::Error;

/// Error types for the echorpc library
#[derive(Error, Debug)]
pub enum RpcError {
    /// Socket-level errors (bind, connect, read, write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (bad address, unknown protocol, bad flags)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Malformed frames or HTTP messages
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer closed the connection before answering
    #[error("Connection closed")]
    ConnectionClosed,

    /// No service registered under the requested name
    #[error("No such service: {0}")]
    NoService(String),

    /// The service has no method with the requested name
    #[error("No such method: {0}")]
    NoMethod(String),

    /// The request could not be understood by the service
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The server is shutting down and refused the request
    #[error("Server is logging off")]
    Logoff,

    /// The server has no capacity left for the request
    #[error("Server overloaded: {0}")]
    Overloaded(String),

    /// An error reported by the remote side
    #[error("Remote error [{code}]: {text}")]
    Remote { code: i32, text: String },
}

impl RpcError {
    /// Wire status code reported to the peer for this error
    pub fn status_code(&self) -> ErrorCode {
        match self {
            RpcError::NoService(_) => ErrorCode::NoService,
            RpcError::NoMethod(_) => ErrorCode::NoMethod,
            RpcError::BadRequest(_) | RpcError::Serialization(_) => ErrorCode::BadRequest,
            RpcError::Logoff => ErrorCode::Logoff,
            RpcError::Overloaded(_) => ErrorCode::Overloaded,
            RpcError::Remote { code, .. } => ErrorCode::from_i32(*code),
            _ => ErrorCode::Internal,
        }
    }

    /// Rebuilds an error from a status code received over the wire
    pub fn from_status(code: i32, text: String) -> Self {
        match ErrorCode::from_i32(code) {
            ErrorCode::Logoff => RpcError::Logoff,
            _ => RpcError::Remote { code, text },
        }
    }

    /// Whether a client may retry the call on another attempt
    ///
    /// Transport failures and logoff refusals are retried. Timeouts and
    /// errors produced by the remote service are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_) | RpcError::ConnectionClosed | RpcError::Logoff
        )
    }
}

impl From<SizeError> for RpcError {
    fn from(err: SizeError) -> Self {
        RpcError::Protocol(err.to_string())
    }
}

impl From<ConnectionError> for RpcError {
    fn from(err: ConnectionError) -> Self {
        RpcError::Overloaded(err.to_string())
    }
}

/// Result type for the echorpc library
pub type Result<T> = std::result::Result<T, RpcError>;

pub mod cli;
pub mod client;
pub mod echo;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod security;
pub mod server;
pub mod shutdown;

// Re-export main types for convenience
pub use client::{Channel, ChannelOptions, ConnectionType, Controller};
pub use echo::{EchoRequest, EchoResponse, EchoService, EchoServiceImpl, EchoServiceStub};
pub use network::Address;
pub use protocol::Protocol;
pub use server::{Server, ServerContext, ServerOptions, Service};
