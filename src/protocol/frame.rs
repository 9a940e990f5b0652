use crate::RpcError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Status codes carried in response metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    NoService = 1001,
    NoMethod = 1002,
    BadRequest = 1003,
    Internal = 2001,
    Logoff = 2002,
    Overloaded = 2003,
}

impl ErrorCode {
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            1001 => ErrorCode::NoService,
            1002 => ErrorCode::NoMethod,
            1003 => ErrorCode::BadRequest,
            2002 => ErrorCode::Logoff,
            2003 => ErrorCode::Overloaded,
            _ => ErrorCode::Internal,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Routing information of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub log_id: u64,
}

/// Outcome of a call as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub error_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_text: String,
}

/// Metadata section of a frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMeta {
    pub correlation_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMeta>,
    #[serde(default)]
    pub attachment_size: u32,
}

/// A single request or response as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFrame {
    pub meta: RpcMeta,
    pub payload: Bytes,
    pub attachment: Bytes,
}

impl RpcFrame {
    /// Builds a request frame; the correlation id is assigned by the connection
    pub fn request(
        service: &str,
        method: &str,
        log_id: u64,
        payload: Bytes,
        attachment: Bytes,
    ) -> Self {
        Self {
            meta: RpcMeta {
                correlation_id: 0,
                request: Some(RequestMeta {
                    service: service.to_string(),
                    method: method.to_string(),
                    log_id,
                }),
                response: None,
                attachment_size: attachment.len() as u32,
            },
            payload,
            attachment,
        }
    }

    /// Builds a successful response to the request with the given correlation id
    pub fn response(correlation_id: u64, payload: Bytes, attachment: Bytes) -> Self {
        Self {
            meta: RpcMeta {
                correlation_id,
                request: None,
                response: Some(ResponseMeta {
                    error_code: ErrorCode::Ok.as_i32(),
                    error_text: String::new(),
                }),
                attachment_size: attachment.len() as u32,
            },
            payload,
            attachment,
        }
    }

    /// Builds an error response to the request with the given correlation id
    pub fn error(correlation_id: u64, err: &RpcError) -> Self {
        Self {
            meta: RpcMeta {
                correlation_id,
                request: None,
                response: Some(ResponseMeta {
                    error_code: err.status_code().as_i32(),
                    error_text: err.to_string(),
                }),
                attachment_size: 0,
            },
            payload: Bytes::new(),
            attachment: Bytes::new(),
        }
    }

    pub fn correlation_id(&self) -> u64 {
        self.meta.correlation_id
    }

    /// Turns a response frame into its payload and attachment, or the error it carries
    pub fn into_result(self) -> crate::Result<(Bytes, Bytes)> {
        match &self.meta.response {
            Some(resp) if resp.error_code != ErrorCode::Ok.as_i32() => Err(
                RpcError::from_status(resp.error_code, resp.error_text.clone()),
            ),
            Some(_) => Ok((self.payload, self.attachment)),
            None => Err(RpcError::Protocol(
                "Expected a response frame, got a request".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from_i32(1001), ErrorCode::NoService);
        assert_eq!(ErrorCode::from_i32(2002), ErrorCode::Logoff);
        assert_eq!(ErrorCode::from_i32(4242), ErrorCode::Internal);
        assert_eq!(ErrorCode::BadRequest.as_i32(), 1003);
    }

    #[test]
    fn test_error_frame_into_result() {
        let frame = RpcFrame::error(7, &RpcError::NoMethod("Shout".to_string()));
        assert_eq!(frame.correlation_id(), 7);

        match frame.into_result() {
            Err(RpcError::Remote { code, text }) => {
                assert_eq!(code, ErrorCode::NoMethod.as_i32());
                assert!(text.contains("Shout"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_logoff_frame_is_retryable() {
        let frame = RpcFrame::error(1, &RpcError::Logoff);
        let err = frame.into_result().unwrap_err();
        assert!(matches!(err, RpcError::Logoff));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_request_frame_is_not_a_response() {
        let frame = RpcFrame::request("EchoService", "Echo", 1, Bytes::new(), Bytes::new());
        assert!(matches!(frame.into_result(), Err(RpcError::Protocol(_))));
    }
}
