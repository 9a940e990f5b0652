//! Network addressing and transports
//!
//! Servers and channels talk over TCP or Unix domain stream sockets.
//! Everything above this module sees a [`BoxedStream`] and never cares
//! which one it got.

pub mod address;
pub mod transport;

pub use address::Address;
pub use transport::{AsyncStream, BoxedStream, Listener, connect};
