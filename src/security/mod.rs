//! Resource limits for servers and codecs

pub mod limits;

pub use limits::{
    ConnectionError, ConnectionGuard, ConnectionMetrics, ConnectionTracker, SizeError,
    SizeValidator,
};
