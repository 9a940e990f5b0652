use super::codec::{MAGIC, RpcCodec};
use super::frame::RpcFrame;
use super::http::HttpServerCodec;
use super::Protocol;
use crate::RpcError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// A request read by a server together with the protocol it arrived in
#[derive(Debug)]
pub struct Inbound {
    pub protocol: Protocol,
    pub frame: RpcFrame,
}

/// Server-side codec that detects the client's protocol
///
/// The first bytes of a connection decide: the `std` magic selects the
/// binary protocol, anything else is parsed as HTTP. The decision holds for
/// the rest of the connection and responses go out in the same protocol.
#[derive(Debug)]
pub struct ServerCodec {
    detected: Option<Protocol>,
    rpc: RpcCodec,
    http: HttpServerCodec,
}

impl ServerCodec {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            detected: None,
            rpc: RpcCodec::new(max_body_size),
            http: HttpServerCodec::new(max_body_size),
        }
    }

    pub fn detected(&self) -> Option<Protocol> {
        self.detected
    }

    fn detect(src: &BytesMut) -> Option<Protocol> {
        let n = src.len().min(MAGIC.len());
        if src[..n] != MAGIC[..n] {
            Some(Protocol::Http)
        } else if n == MAGIC.len() {
            Some(Protocol::Std)
        } else {
            None
        }
    }
}

impl Decoder for ServerCodec {
    type Item = Inbound;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, RpcError> {
        if self.detected.is_none() {
            if src.is_empty() {
                return Ok(None);
            }
            match Self::detect(src) {
                Some(protocol) => {
                    tracing::debug!(%protocol, "Detected protocol");
                    self.detected = Some(protocol);
                }
                None => return Ok(None),
            }
        }

        let protocol = self.detected.unwrap_or_default();
        let frame = match protocol {
            Protocol::Std => self.rpc.decode(src)?,
            Protocol::Http => self.http.decode(src)?,
        };
        Ok(frame.map(|frame| Inbound { protocol, frame }))
    }
}

impl Encoder<RpcFrame> for ServerCodec {
    type Error = RpcError;

    fn encode(&mut self, frame: RpcFrame, dst: &mut BytesMut) -> Result<(), RpcError> {
        match self.detected {
            Some(Protocol::Http) => self.http.encode(frame, dst),
            _ => self.rpc.encode(frame, dst),
        }
    }
}
