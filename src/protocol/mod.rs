//! Wire formats
//!
//! Two protocols are spoken:
//!
//! - `std`: a length-prefixed binary frame carrying JSON metadata, the
//!   encoded message and a raw attachment. Many calls may share one
//!   connection; responses are matched to requests by correlation id.
//! - `http`: HTTP/1.1 `POST /<Service>/<Method>`, one call at a time per
//!   connection.
//!
//! Servers detect the protocol from the first bytes of each connection.

pub mod codec;
pub mod frame;
pub mod http;
pub mod message;
pub mod server_codec;

pub use codec::RpcCodec;
pub use frame::{ErrorCode, RequestMeta, ResponseMeta, RpcFrame, RpcMeta};
pub use http::{HttpClientCodec, HttpServerCodec};
pub use server_codec::{Inbound, ServerCodec};

use crate::RpcError;
use std::fmt;
use std::str::FromStr;

/// Default upper bound for a single frame body
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Protocol spoken on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Std,
    Http,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Std => "std",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "std" | "baidu_std" => Ok(Protocol::Std),
            "http" => Ok(Protocol::Http),
            other => Err(RpcError::Config(format!(
                "Unknown protocol '{other}', expected one of: std, http"
            ))),
        }
    }
}
