use super::frame::{RpcFrame, RpcMeta};
use crate::security::SizeValidator;
use crate::RpcError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Magic bytes opening every `std` frame
pub const MAGIC: &[u8; 4] = b"ERPC";

/// magic + body_size + meta_size
pub const HEADER_LEN: usize = 12;

/// Codec for the binary `std` protocol
///
/// ```text
/// "ERPC" | body_size: u32 | meta_size: u32 | meta (JSON) | payload | attachment
/// ```
///
/// All integers are big-endian. `body_size` counts everything after the
/// header and `meta.attachment_size` tells where the payload ends.
#[derive(Debug, Clone)]
pub struct RpcCodec {
    limit: SizeValidator,
}

impl RpcCodec {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            limit: SizeValidator::new(max_body_size),
        }
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_BODY_SIZE)
    }
}

impl Decoder for RpcCodec {
    type Item = RpcFrame;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcFrame>, RpcError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        if &src[..4] != MAGIC {
            return Err(RpcError::Protocol(format!(
                "Bad magic {:?}, expected {:?}",
                &src[..4],
                MAGIC
            )));
        }

        let body_size = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        let meta_size = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
        self.limit.validate_size(body_size)?;

        if meta_size > body_size {
            return Err(RpcError::Protocol(format!(
                "Meta size {meta_size} exceeds body size {body_size}"
            )));
        }

        if src.len() < HEADER_LEN + body_size {
            src.reserve(HEADER_LEN + body_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut body = src.split_to(body_size).freeze();
        let meta_bytes = body.split_to(meta_size);
        let meta: RpcMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| RpcError::Protocol(format!("Invalid frame meta: {e}")))?;

        let attachment_size = meta.attachment_size as usize;
        if attachment_size > body.len() {
            return Err(RpcError::Protocol(format!(
                "Attachment size {attachment_size} exceeds remaining body of {} bytes",
                body.len()
            )));
        }

        let payload = body.split_to(body.len() - attachment_size);
        Ok(Some(RpcFrame {
            meta,
            payload,
            attachment: body,
        }))
    }
}

impl Encoder<RpcFrame> for RpcCodec {
    type Error = RpcError;

    fn encode(&mut self, mut frame: RpcFrame, dst: &mut BytesMut) -> Result<(), RpcError> {
        frame.meta.attachment_size = u32::try_from(frame.attachment.len())
            .map_err(|_| RpcError::Protocol("Attachment too large".to_string()))?;
        let meta = serde_json::to_vec(&frame.meta)?;

        let body_size = meta.len() + frame.payload.len() + frame.attachment.len();
        self.limit.validate_size(body_size)?;

        dst.reserve(HEADER_LEN + body_size);
        dst.put_slice(MAGIC);
        dst.put_u32(body_size as u32);
        dst.put_u32(meta.len() as u32);
        dst.put_slice(&meta);
        dst.put_slice(&frame.payload);
        dst.put_slice(&frame.attachment);
        Ok(())
    }
}
