//! Resource Management
//!
//! Caps the number of connections handled at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::Result;

/// Hands out one [`ConnectionSlot`] per live connection.
#[derive(Debug)]
pub struct ResourceManager {
    max_connections: usize,
    connection_semaphore: Arc<Semaphore>,
    stats: ResourceStats,
}

/// Lifetime counters behind [`ResourceUsageStats`].
#[derive(Debug, Default)]
pub struct ResourceStats {
    pub peak_connections: AtomicUsize,
    pub total_connections_created: AtomicUsize,
    pub total_connections_rejected: AtomicUsize,
}

/// Snapshot of [`ResourceStats`] plus current usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsageStats {
    pub active_connections: usize,
    pub max_connections: usize,
    pub peak_connections: usize,
    pub total_connections_created: usize,
    pub total_connections_rejected: usize,
}

impl ResourceManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
            stats: ResourceStats::default(),
        }
    }

    /// Try to acquire a connection slot without waiting.
    pub fn acquire_connection_slot(&self) -> Result<ConnectionSlot> {
        match Arc::clone(&self.connection_semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.stats
                    .total_connections_created
                    .fetch_add(1, Ordering::Relaxed);

                let current = self.active_connections();
                self.stats
                    .peak_connections
                    .fetch_max(current, Ordering::Relaxed);

                debug!("Acquired connection slot, active connections: {}", current);
                Ok(ConnectionSlot { _permit: permit })
            }
            Err(_) => {
                self.stats
                    .total_connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "All {} connection slots taken",
                    self.max_connections
                );
                Err(anyhow::anyhow!("no free connection slot"))
            }
        }
    }

    pub fn active_connections(&self) -> usize {
        self.max_connections - self.connection_semaphore.available_permits()
    }

    pub fn get_stats(&self) -> ResourceUsageStats {
        ResourceUsageStats {
            active_connections: self.active_connections(),
            max_connections: self.max_connections,
            peak_connections: self.stats.peak_connections.load(Ordering::Relaxed),
            total_connections_created: self.stats.total_connections_created.load(Ordering::Relaxed),
            total_connections_rejected: self
                .stats
                .total_connections_rejected
                .load(Ordering::Relaxed),
        }
    }
}

/// RAII permit for one connection; released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_slot_acquisition() {
        let manager = ResourceManager::new(2);

        let slot1 = manager.acquire_connection_slot().unwrap();
        let _slot2 = manager.acquire_connection_slot().unwrap();
        assert!(manager.acquire_connection_slot().is_err());
        assert_eq!(manager.active_connections(), 2);

        drop(slot1);
        let _slot3 = manager.acquire_connection_slot().unwrap();

        let stats = manager.get_stats();
        assert_eq!(stats.total_connections_created, 3);
        assert_eq!(stats.total_connections_rejected, 1);
        assert_eq!(stats.peak_connections, 2);
    }
}
