//! Client side: channels, per-call controllers and connection management

pub mod channel;
mod connection;
pub mod controller;
pub mod load_balancer;
pub mod naming;
pub mod options;
mod socket_map;

pub use channel::Channel;
pub use controller::Controller;
pub use load_balancer::{LoadBalancer, Randomized, RoundRobin};
pub use options::{ChannelOptions, ConnectionType};
