use crate::protocol::{DEFAULT_MAX_BODY_SIZE, Protocol};
use crate::{Result, RpcError};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How a channel uses connections to a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// One connection per server shared by all concurrent calls
    Single,
    /// A pool of connections per server, each used by one call at a time
    Pooled,
    /// A fresh connection for every call, closed afterwards
    Short,
}

impl ConnectionType {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionType::Single => "single",
            ConnectionType::Pooled => "pooled",
            ConnectionType::Short => "short",
        }
    }

    /// Connection type used when none is configured
    pub fn default_for(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Std => ConnectionType::Single,
            Protocol::Http => ConnectionType::Pooled,
        }
    }

    /// Parses a flag value where the empty string means "the protocol's default"
    pub fn parse_optional(s: &str) -> Result<Option<Self>> {
        if s.trim().is_empty() {
            Ok(None)
        } else {
            s.parse().map(Some)
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConnectionType {
    type Err = RpcError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(ConnectionType::Single),
            "pooled" => Ok(ConnectionType::Pooled),
            "short" => Ok(ConnectionType::Short),
            other => Err(RpcError::Config(format!(
                "Unknown connection type '{other}', expected one of: single, pooled, short"
            ))),
        }
    }
}

/// Configuration for a [`Channel`](super::Channel)
///
/// # Examples
///
/// ```
/// use echorpc::{ChannelOptions, ConnectionType, Protocol};
/// use std::time::Duration;
///
/// let options = ChannelOptions::default()
///     .with_protocol(Protocol::Http)
///     .with_timeout(Some(Duration::from_millis(500)))
///     .with_max_retry(1);
///
/// assert_eq!(options.effective_connection_type(), ConnectionType::Pooled);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Protocol spoken to servers
    pub protocol: Protocol,
    /// Connection type; `None` picks the protocol's default
    pub connection_type: Option<ConnectionType>,
    /// Deadline of a whole call, retries included; `None` waits forever
    pub timeout: Option<Duration>,
    /// Retries after the first attempt
    pub max_retry: u32,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Largest frame body accepted or sent
    pub max_body_size: usize,
    /// Idle connections kept per server for pooled channels
    pub max_pool_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::Std,
            connection_type: None,
            timeout: Some(Duration::from_millis(100)),
            max_retry: 3,
            connect_timeout: Duration::from_millis(200),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_pool_size: 16,
        }
    }
}

impl ChannelOptions {
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_connection_type(mut self, connection_type: Option<ConnectionType>) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn effective_connection_type(&self) -> ConnectionType {
        self.connection_type
            .unwrap_or_else(|| ConnectionType::default_for(self.protocol))
    }

    /// Rejects combinations the channel cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.protocol == Protocol::Http
            && self.effective_connection_type() == ConnectionType::Single
        {
            return Err(RpcError::Config(
                "Protocol http does not support single connections, use pooled or short"
                    .to_string(),
            ));
        }
        if self.max_body_size == 0 {
            return Err(RpcError::Config("max_body_size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type_parsing() {
        assert_eq!("single".parse::<ConnectionType>().unwrap(), ConnectionType::Single);
        assert_eq!("Pooled".parse::<ConnectionType>().unwrap(), ConnectionType::Pooled);
        assert_eq!("short".parse::<ConnectionType>().unwrap(), ConnectionType::Short);
        assert!("persistent".parse::<ConnectionType>().is_err());
        assert_eq!(ConnectionType::parse_optional("").unwrap(), None);
    }

    #[test]
    fn test_protocol_defaults() {
        let std = ChannelOptions::default();
        assert_eq!(std.effective_connection_type(), ConnectionType::Single);

        let http = ChannelOptions::default().with_protocol(Protocol::Http);
        assert_eq!(http.effective_connection_type(), ConnectionType::Pooled);
    }

    #[test]
    fn test_http_single_is_rejected() {
        let options = ChannelOptions::default()
            .with_protocol(Protocol::Http)
            .with_connection_type(Some(ConnectionType::Single));
        assert!(matches!(options.validate(), Err(RpcError::Config(_))));

        let options = options.with_connection_type(Some(ConnectionType::Short));
        assert!(options.validate().is_ok());
    }
}
