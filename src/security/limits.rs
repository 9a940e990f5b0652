use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Connection tracking for a server
///
/// Hands out a bounded number of connection slots and lets the server wait
/// until every slot has been released, which is how shutdown knows that all
/// clients are gone.
#[derive(Debug)]
pub struct ConnectionTracker {
    active_connections: AtomicUsize,
    total_connections: AtomicU64,
    connection_semaphore: Arc<Semaphore>,
    max_connections: usize,
    released: Notify,
}

impl ConnectionTracker {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            active_connections: AtomicUsize::new(0),
            total_connections: AtomicU64::new(0),
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            released: Notify::new(),
        })
    }

    /// Attempt to take a connection slot without waiting
    pub fn try_acquire(self: &Arc<Self>) -> Result<ConnectionGuard, ConnectionError> {
        let permit = self
            .connection_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ConnectionError::LimitReached {
                limit: self.max_connections,
            })?;

        let active = self.active_connections.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total_connections.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(
            active_connections = active,
            total_connections = total,
            "Connection acquired"
        );

        Ok(ConnectionGuard {
            _permit: permit,
            tracker: Arc::clone(self),
            start_time: Instant::now(),
        })
    }

    /// Number of connections currently holding a slot
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Waits until no connection holds a slot or the timeout elapses
    ///
    /// Returns true when the tracker drained in time.
    pub async fn wait_idle(&self, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.active() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return self.active() == 0;
            }
        }
    }

    /// Get current metrics
    pub fn metrics(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            active_connections: self.active_connections.load(Ordering::SeqCst),
            total_connections: self.total_connections.load(Ordering::SeqCst),
            available_slots: self.connection_semaphore.available_permits(),
            max_connections: self.max_connections,
        }
    }
}

/// RAII guard for a connection slot
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
    tracker: Arc<ConnectionTracker>,
    start_time: Instant,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self
            .tracker
            .active_connections
            .fetch_sub(1, Ordering::SeqCst)
            - 1;
        let duration = self.start_time.elapsed();

        tracing::debug!(
            active_connections = active,
            connection_duration_ms = duration.as_millis() as u64,
            "Connection released"
        );
        self.tracker.released.notify_waiters();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection limit of {limit} reached")]
    LimitReached { limit: usize },
}

/// Connection metrics for monitoring
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub active_connections: usize,
    pub total_connections: u64,
    pub available_slots: usize,
    pub max_connections: usize,
}

/// Size validator for frame bodies
#[derive(Debug, Clone, Copy)]
pub struct SizeValidator {
    max_size: usize,
}

impl SizeValidator {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn validate_size(&self, size: usize) -> Result<(), SizeError> {
        if size > self.max_size {
            Err(SizeError::TooLarge {
                actual: size,
                max: self.max_size,
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SizeError {
    #[error("Body too large: {actual} bytes, maximum allowed: {max} bytes")]
    TooLarge { actual: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracker_limit() {
        let tracker = ConnectionTracker::new(2);

        let guard1 = tracker.try_acquire().unwrap();
        let _guard2 = tracker.try_acquire().unwrap();

        assert!(matches!(
            tracker.try_acquire(),
            Err(ConnectionError::LimitReached { limit: 2 })
        ));

        drop(guard1);
        let _guard3 = tracker.try_acquire().unwrap();

        let metrics = tracker.metrics();
        assert_eq!(metrics.active_connections, 2);
        assert_eq!(metrics.total_connections, 3);
        assert_eq!(metrics.available_slots, 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_released() {
        let tracker = ConnectionTracker::new(4);
        let guard = tracker.try_acquire().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(tracker.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out() {
        let tracker = ConnectionTracker::new(4);
        let _guard = tracker.try_acquire().unwrap();

        assert!(!tracker.wait_idle(Duration::from_millis(50)).await);
    }

    #[test]
    fn test_size_validator() {
        let validator = SizeValidator::new(100);

        assert!(validator.validate_size(50).is_ok());
        assert!(validator.validate_size(100).is_ok());
        assert!(validator.validate_size(101).is_err());
    }
}
