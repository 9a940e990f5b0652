use super::frame::{ErrorCode, RequestMeta, ResponseMeta, RpcFrame, RpcMeta};
use crate::security::SizeValidator;
use crate::RpcError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::StatusCode;
use std::fmt::Write as _;
use tokio_util::codec::{Decoder, Encoder};

const MAX_HEADERS: usize = 32;
const MAX_HEAD_SIZE: usize = 16 * 1024;

const ATTACHMENT_SIZE_HEADER: &str = "x-attachment-size";
const ERROR_CODE_HEADER: &str = "x-error-code";
const LOG_ID_HEADER: &str = "log-id";

/// Owned view of an HTTP head, detached from the read buffer
struct Head {
    len: usize,
    content_length: usize,
    attachment_size: usize,
    log_id: u64,
    error_code: Option<i32>,
    status: u16,
    path: String,
}

fn header_value<'a>(headers: &'a [httparse::Header<'_>], name: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}

fn parse_header<T: std::str::FromStr>(
    headers: &[httparse::Header<'_>],
    name: &str,
) -> Result<Option<T>, RpcError> {
    match header_value(headers, name) {
        None => Ok(None),
        Some(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .map(Some)
            .ok_or_else(|| RpcError::Protocol(format!("Invalid {name} header"))),
    }
}

fn head_from_headers(
    len: usize,
    headers: &[httparse::Header<'_>],
    status: u16,
    path: String,
) -> Result<Head, RpcError> {
    let content_length = parse_header::<usize>(headers, "content-length")?.unwrap_or(0);
    let attachment_size = parse_header::<usize>(headers, ATTACHMENT_SIZE_HEADER)?.unwrap_or(0);
    if attachment_size > content_length {
        return Err(RpcError::Protocol(format!(
            "Attachment size {attachment_size} exceeds content length {content_length}"
        )));
    }
    Ok(Head {
        len,
        content_length,
        attachment_size,
        log_id: parse_header::<u64>(headers, LOG_ID_HEADER)?.unwrap_or(0),
        error_code: parse_header::<i32>(headers, ERROR_CODE_HEADER)?,
        status,
        path,
    })
}

fn parse_request_head(buf: &[u8]) -> Result<Option<Head>, RpcError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let path = req.path.unwrap_or("/").to_string();
            head_from_headers(len, req.headers, 0, path).map(Some)
        }
        Ok(httparse::Status::Partial) => check_partial(buf),
        Err(e) => Err(RpcError::Protocol(format!("Invalid HTTP request: {e}"))),
    }
}

fn parse_response_head(buf: &[u8]) -> Result<Option<Head>, RpcError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let status = resp.code.unwrap_or(0);
            head_from_headers(len, resp.headers, status, String::new()).map(Some)
        }
        Ok(httparse::Status::Partial) => check_partial(buf),
        Err(e) => Err(RpcError::Protocol(format!("Invalid HTTP response: {e}"))),
    }
}

fn check_partial(buf: &[u8]) -> Result<Option<Head>, RpcError> {
    if buf.len() > MAX_HEAD_SIZE {
        Err(RpcError::Protocol(format!(
            "HTTP head exceeds {MAX_HEAD_SIZE} bytes"
        )))
    } else {
        Ok(None)
    }
}

/// Splits `/<Service>/<Method>?query` into its two names
///
/// Anything that does not have exactly two segments yields empty names so
/// the request is answered with a "no such service" error.
fn split_path(path: &str) -> (String, String) {
    let path = path.split('?').next().unwrap_or("");
    let mut segments = path.trim_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(service), Some(method), None) if !service.is_empty() && !method.is_empty() => {
            (service.to_string(), method.to_string())
        }
        _ => (String::new(), String::new()),
    }
}

/// Takes the body announced by `head` out of `src`, or reserves room for it
fn take_body(
    head: &Head,
    limit: &SizeValidator,
    src: &mut BytesMut,
) -> Result<Option<(Bytes, Bytes)>, RpcError> {
    limit.validate_size(head.content_length)?;
    let total = head.len + head.content_length;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    src.advance(head.len);
    let mut body = src.split_to(head.content_length).freeze();
    let payload = body.split_to(head.content_length - head.attachment_size);
    Ok(Some((payload, body)))
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Ok => StatusCode::OK,
        ErrorCode::NoService | ErrorCode::NoMethod => StatusCode::NOT_FOUND,
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::Logoff | ErrorCode::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Client side of the HTTP mapping: encodes requests, decodes responses
#[derive(Debug, Clone)]
pub struct HttpClientCodec {
    host: String,
    limit: SizeValidator,
}

impl HttpClientCodec {
    pub fn new(host: impl Into<String>, max_body_size: usize) -> Self {
        Self {
            host: host.into(),
            limit: SizeValidator::new(max_body_size),
        }
    }
}

impl Encoder<RpcFrame> for HttpClientCodec {
    type Error = RpcError;

    fn encode(&mut self, frame: RpcFrame, dst: &mut BytesMut) -> Result<(), RpcError> {
        let request = frame
            .meta
            .request
            .as_ref()
            .ok_or_else(|| RpcError::Protocol("HTTP client can only send requests".to_string()))?;
        let content_length = frame.payload.len() + frame.attachment.len();
        self.limit.validate_size(content_length)?;

        let mut head = String::with_capacity(256);
        // Writing to a String cannot fail.
        let _ = write!(
            head,
            "POST /{}/{} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nLog-Id: {}\r\nX-Attachment-Size: {}\r\n\r\n",
            request.service,
            request.method,
            self.host,
            content_length,
            request.log_id,
            frame.attachment.len(),
        );

        dst.reserve(head.len() + content_length);
        dst.put_slice(head.as_bytes());
        dst.put_slice(&frame.payload);
        dst.put_slice(&frame.attachment);
        Ok(())
    }
}

impl Decoder for HttpClientCodec {
    type Item = RpcFrame;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcFrame>, RpcError> {
        let Some(head) = parse_response_head(src)? else {
            return Ok(None);
        };
        let Some((payload, attachment)) = take_body(&head, &self.limit, src)? else {
            return Ok(None);
        };

        if head.status == StatusCode::OK.as_u16() {
            return Ok(Some(RpcFrame::response(0, payload, attachment)));
        }

        let error_code = head.error_code.unwrap_or(ErrorCode::Internal.as_i32());
        let mut error_text = String::from_utf8_lossy(&payload).into_owned();
        if error_text.is_empty() {
            error_text = format!("HTTP status {}", head.status);
        }
        Ok(Some(RpcFrame {
            meta: RpcMeta {
                correlation_id: 0,
                request: None,
                response: Some(ResponseMeta {
                    error_code,
                    error_text,
                }),
                attachment_size: 0,
            },
            payload: Bytes::new(),
            attachment: Bytes::new(),
        }))
    }
}

/// Server side of the HTTP mapping: decodes requests, encodes responses
#[derive(Debug, Clone)]
pub struct HttpServerCodec {
    limit: SizeValidator,
}

impl HttpServerCodec {
    pub fn new(max_body_size: usize) -> Self {
        Self {
            limit: SizeValidator::new(max_body_size),
        }
    }
}

impl Decoder for HttpServerCodec {
    type Item = RpcFrame;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcFrame>, RpcError> {
        let Some(head) = parse_request_head(src)? else {
            return Ok(None);
        };
        let Some((payload, attachment)) = take_body(&head, &self.limit, src)? else {
            return Ok(None);
        };

        let (service, method) = split_path(&head.path);
        Ok(Some(RpcFrame {
            meta: RpcMeta {
                correlation_id: 0,
                request: Some(RequestMeta {
                    service,
                    method,
                    log_id: head.log_id,
                }),
                response: None,
                attachment_size: attachment.len() as u32,
            },
            payload,
            attachment,
        }))
    }
}

impl Encoder<RpcFrame> for HttpServerCodec {
    type Error = RpcError;

    fn encode(&mut self, frame: RpcFrame, dst: &mut BytesMut) -> Result<(), RpcError> {
        let (code, error_text) = match &frame.meta.response {
            Some(resp) => (ErrorCode::from_i32(resp.error_code), resp.error_text.as_str()),
            None => {
                return Err(RpcError::Protocol(
                    "HTTP server can only send responses".to_string(),
                ));
            }
        };
        let status = status_for(code);

        let mut head = String::with_capacity(256);
        if code == ErrorCode::Ok {
            let content_length = frame.payload.len() + frame.attachment.len();
            self.limit.validate_size(content_length)?;
            let _ = write!(
                head,
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nX-Attachment-Size: {}\r\n\r\n",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                content_length,
                frame.attachment.len(),
            );
            dst.reserve(head.len() + content_length);
            dst.put_slice(head.as_bytes());
            dst.put_slice(&frame.payload);
            dst.put_slice(&frame.attachment);
        } else {
            let _ = write!(
                head,
                "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nX-Error-Code: {}\r\n\r\n",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                error_text.len(),
                code.as_i32(),
            );
            dst.reserve(head.len() + error_text.len());
            dst.put_slice(head.as_bytes());
            dst.put_slice(error_text.as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024 * 1024;

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("/EchoService/Echo"),
            ("EchoService".to_string(), "Echo".to_string())
        );
        assert_eq!(
            split_path("/EchoService/Echo?x=1"),
            ("EchoService".to_string(), "Echo".to_string())
        );
        assert_eq!(split_path("/"), (String::new(), String::new()));
        assert_eq!(split_path("/a/b/c"), (String::new(), String::new()));
    }

    #[test]
    fn test_client_request_is_parsed_by_server() {
        let mut client = HttpClientCodec::new("127.0.0.1:8000", MAX);
        let mut server = HttpServerCodec::new(MAX);
        let mut buf = BytesMut::new();

        let request = RpcFrame::request(
            "EchoService",
            "Echo",
            5,
            Bytes::from_static(br#"{"message":"hi"}"#),
            Bytes::from_static(b"blob"),
        );
        client.encode(request, &mut buf).unwrap();
        assert!(buf.starts_with(b"POST /EchoService/Echo HTTP/1.1\r\n"));

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        let meta = decoded.meta.request.unwrap();
        assert_eq!(meta.service, "EchoService");
        assert_eq!(meta.method, "Echo");
        assert_eq!(meta.log_id, 5);
        assert_eq!(&decoded.payload[..], br#"{"message":"hi"}"#);
        assert_eq!(&decoded.attachment[..], b"blob");
    }

    #[test]
    fn test_server_waits_for_body() {
        let mut server = HttpServerCodec::new(MAX);
        let mut buf = BytesMut::from(
            &b"POST /EchoService/Echo HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"mes"[..],
        );
        assert!(server.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"sage");
        assert!(server.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"");
        assert!(server.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_error_response_round_trip() {
        let mut server = HttpServerCodec::new(MAX);
        let mut client = HttpClientCodec::new("localhost", MAX);
        let mut buf = BytesMut::new();

        server
            .encode(RpcFrame::error(0, &RpcError::NoService("Nope".to_string())), &mut buf)
            .unwrap();
        assert!(buf.starts_with(b"HTTP/1.1 404 Not Found\r\n"));

        let frame = client.decode(&mut buf).unwrap().unwrap();
        match frame.into_result() {
            Err(RpcError::Remote { code, text }) => {
                assert_eq!(code, ErrorCode::NoService.as_i32());
                assert!(text.contains("Nope"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_attachment_larger_than_body_is_rejected() {
        let mut server = HttpServerCodec::new(MAX);
        let mut buf = BytesMut::from(
            &b"POST /S/M HTTP/1.1\r\nContent-Length: 2\r\nX-Attachment-Size: 3\r\n\r\nab"[..],
        );
        assert!(matches!(server.decode(&mut buf), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_body_limit() {
        let mut server = HttpServerCodec::new(4);
        let mut buf =
            BytesMut::from(&b"POST /S/M HTTP/1.1\r\nContent-Length: 100\r\n\r\n"[..]);
        assert!(server.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_response_is_not_written() {
        let mut server = HttpServerCodec::new(4);
        let mut out = BytesMut::new();
        let frame = RpcFrame::response(0, Bytes::from_static(b"too large"), Bytes::new());
        assert!(matches!(server.encode(frame, &mut out), Err(RpcError::Protocol(_))));
        assert!(out.is_empty());
    }
}
