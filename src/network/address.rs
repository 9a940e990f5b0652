use crate::RpcError;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Endpoint of a server or connection: a network socket or a Unix domain socket path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Network address (IPv4 or IPv6)
    Network(SocketAddr),
    /// Unix domain socket path
    Unix(PathBuf),
    /// Unix domain socket end that was never bound to a path, such as a client side
    UnnamedUnix,
}

/// Text form of [`Address::UnnamedUnix`]
const UNNAMED_UNIX: &str = "unix:<unnamed>";

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Network(addr) => write!(f, "{addr}"),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
            Address::UnnamedUnix => f.write_str(UNNAMED_UNIX),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Network(addr)
    }
}

impl From<PathBuf> for Address {
    fn from(path: PathBuf) -> Self {
        Address::Unix(path)
    }
}

impl FromStr for Address {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == UNNAMED_UNIX {
            Ok(Address::UnnamedUnix)
        } else if let Some(stripped) = s.strip_prefix("unix:") {
            if stripped.is_empty() {
                return Err(RpcError::Config("Empty unix socket path".to_string()));
            }
            Ok(Address::Unix(PathBuf::from(stripped)))
        } else {
            s.parse::<SocketAddr>()
                .map(Address::Network)
                .map_err(|e| RpcError::Config(format!("Invalid socket address '{s}': {e}")))
        }
    }
}

impl Address {
    /// Returns true if this is a network address
    pub fn is_network(&self) -> bool {
        matches!(self, Address::Network(_))
    }

    /// Returns true if this is a Unix domain socket address
    pub fn is_unix(&self) -> bool {
        matches!(self, Address::Unix(_) | Address::UnnamedUnix)
    }

    /// Get the network address if this is a network address
    pub fn as_network(&self) -> Option<&SocketAddr> {
        match self {
            Address::Network(addr) => Some(addr),
            _ => None,
        }
    }

    /// Get the Unix path if this is a Unix domain socket
    pub fn as_unix(&self) -> Option<&PathBuf> {
        match self {
            Address::Unix(path) => Some(path),
            _ => None,
        }
    }
}
