//! Server selection for channels with more than one server

use crate::{Result, RpcError};
use rand::Rng;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks which server a call goes to
pub trait LoadBalancer: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Returns the index of the chosen server among `server_count`
    ///
    /// Servers listed in `excluded` already failed the current call and are
    /// avoided while any other server is left. Returns `None` only when
    /// there are no servers at all.
    fn select(&self, server_count: usize, excluded: &[usize]) -> Option<usize>;
}

/// Builds a balancer from its flag name; an empty name means round robin
pub fn from_name(name: &str) -> Result<Box<dyn LoadBalancer>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "rr" => Ok(Box::new(RoundRobin::default())),
        "random" => Ok(Box::new(Randomized)),
        other => Err(RpcError::Config(format!(
            "Unknown load balancer '{other}', expected one of: rr, random"
        ))),
    }
}

fn candidates(server_count: usize, excluded: &[usize]) -> Vec<usize> {
    let remaining: Vec<usize> = (0..server_count).filter(|i| !excluded.contains(i)).collect();
    if remaining.is_empty() {
        (0..server_count).collect()
    } else {
        remaining
    }
}

/// Visits servers in order, one call after another
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "rr"
    }

    fn select(&self, server_count: usize, excluded: &[usize]) -> Option<usize> {
        if server_count == 0 {
            return None;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let chosen = (0..server_count)
            .map(|offset| (start + offset) % server_count)
            .find(|i| !excluded.contains(i))
            .unwrap_or(start % server_count);
        Some(chosen)
    }
}

/// Picks a uniformly random server
#[derive(Debug, Default)]
pub struct Randomized;

impl LoadBalancer for Randomized {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, server_count: usize, excluded: &[usize]) -> Option<usize> {
        if server_count == 0 {
            return None;
        }
        let pool = candidates(server_count, excluded);
        let pick = rand::rng().random_range(0..pool.len());
        Some(pool[pick])
    }
}
