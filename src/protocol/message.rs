//! Payload encoding
//!
//! Messages travel as JSON. Attachments are never encoded and bypass this
//! module entirely.

use crate::Result;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode<M: Serialize>(message: &M) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

pub fn decode<M: DeserializeOwned>(payload: &[u8]) -> Result<M> {
    Ok(serde_json::from_slice(payload)?)
}
