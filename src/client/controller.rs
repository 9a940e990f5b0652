use crate::network::Address;
use bytes::Bytes;
use std::time::Duration;

/// Per-call settings and results
///
/// The caller sets the log id and request attachment before a call; the
/// channel fills in the rest. A controller describes one call and should not
/// be reused.
#[derive(Debug, Default, Clone)]
pub struct Controller {
    log_id: u64,
    request_attachment: Bytes,
    response_attachment: Bytes,
    remote_side: Option<Address>,
    local_side: Option<Address>,
    latency: Duration,
    retried_count: u32,
    error_text: Option<String>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_log_id(&mut self, log_id: u64) {
        self.log_id = log_id;
    }

    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    /// Raw bytes sent next to the request message
    pub fn set_request_attachment(&mut self, attachment: impl Into<Bytes>) {
        self.request_attachment = attachment.into();
    }

    pub fn request_attachment(&self) -> &Bytes {
        &self.request_attachment
    }

    /// Raw bytes the server sent back next to the response message
    pub fn response_attachment(&self) -> &Bytes {
        &self.response_attachment
    }

    /// Server that handled the last attempt
    pub fn remote_side(&self) -> Option<&Address> {
        self.remote_side.as_ref()
    }

    /// Local end of the connection used by the last attempt
    pub fn local_side(&self) -> Option<&Address> {
        self.local_side.as_ref()
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn latency_us(&self) -> u64 {
        self.latency.as_micros() as u64
    }

    pub fn retried_count(&self) -> u32 {
        self.retried_count
    }

    pub fn failed(&self) -> bool {
        self.error_text.is_some()
    }

    pub fn error_text(&self) -> &str {
        self.error_text.as_deref().unwrap_or("")
    }

    pub(crate) fn begin_attempt(&mut self, remote: Address) {
        self.remote_side = Some(remote);
        self.local_side = None;
    }

    pub(crate) fn set_local_side(&mut self, local: Address) {
        self.local_side = Some(local);
    }

    pub(crate) fn record_retry(&mut self) {
        self.retried_count += 1;
    }

    pub(crate) fn finish_ok(&mut self, attachment: Bytes, latency: Duration) {
        self.response_attachment = attachment;
        self.latency = latency;
        self.error_text = None;
    }

    pub(crate) fn finish_err(&mut self, error_text: String, latency: Duration) {
        self.response_attachment = Bytes::new();
        self.latency = latency;
        self.error_text = Some(error_text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_controller() {
        let cntl = Controller::new();
        assert!(!cntl.failed());
        assert_eq!(cntl.error_text(), "");
        assert!(cntl.remote_side().is_none());
        assert!(cntl.response_attachment().is_empty());
    }

    #[test]
    fn test_finish_records_outcome() {
        let mut cntl = Controller::new();
        cntl.set_log_id(3);
        cntl.set_request_attachment("blob");
        cntl.begin_attempt("127.0.0.1:8000".parse().unwrap());

        cntl.finish_err("Connection closed".to_string(), Duration::from_micros(250));
        assert!(cntl.failed());
        assert_eq!(cntl.latency_us(), 250);

        cntl.finish_ok(Bytes::from_static(b"blob"), Duration::from_micros(100));
        assert!(!cntl.failed());
        assert_eq!(&cntl.response_attachment()[..], b"blob");
        assert_eq!(cntl.log_id(), 3);
    }
}
