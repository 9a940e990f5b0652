//! RPC server
//!
//! A [`Server`] owns a set of [`Service`]s, listens on one TCP or Unix
//! address and answers requests in whichever protocol each client speaks.

mod connection;
pub mod options;
#[allow(clippy::module_inception)]
pub mod server;
pub mod service;

pub use options::ServerOptions;
pub use server::Server;
pub use service::{ServerContext, Service};
