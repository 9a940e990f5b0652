use crate::protocol::DEFAULT_MAX_BODY_SIZE;
use std::time::Duration;

/// Configuration for an RPC server
///
/// # Examples
///
/// ```
/// use echorpc::ServerOptions;
/// use std::time::Duration;
///
/// let options = ServerOptions::default()
///     .with_idle_timeout(Some(Duration::from_secs(30)))
///     .with_logoff(Duration::from_millis(500))
///     .with_max_connections(64);
///
/// assert_eq!(options.max_connections, 64);
/// assert_eq!(options.idle_timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Connections without any read or write for this long are closed; `None` keeps them open
    pub idle_timeout: Option<Duration>,
    /// Longest time to wait for clients to disconnect when stopping
    pub logoff: Duration,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Largest frame body accepted or sent
    pub max_body_size: usize,
    /// Write timeout for responses
    pub write_timeout: Duration,
    /// Requests of one `std` connection served at once; reading pauses at the limit
    pub max_in_flight: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            logoff: Duration::from_millis(2000),
            max_connections: 1000,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            write_timeout: Duration::from_secs(30),
            max_in_flight: 1024,
        }
    }
}

impl ServerOptions {
    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the logoff duration
    pub fn with_logoff(mut self, logoff: Duration) -> Self {
        self.logoff = logoff;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the maximum frame body size
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Set the write timeout
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Set how many requests of one connection may be served at once
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.idle_timeout, None);
        assert_eq!(options.logoff, Duration::from_millis(2000));
        assert_eq!(options.max_connections, 1000);
        assert_eq!(options.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(options.max_in_flight, 1024);
    }
}
