//! Reusable copy buffers

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Size of every buffer handed out by a [`BufferPool`].
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of idle buffers a pool keeps.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Counters describing pool usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers created because none was idle.
    pub allocated: u64,
    /// Checkouts served from an idle buffer.
    pub reused: u64,
    pub idle: usize,
    pub in_use: usize,
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Box<[u8]>>>,
    max_idle: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
    in_use: AtomicUsize,
}

/// Shared pool of [`COPY_BUFFER_SIZE`] byte buffers.
///
/// Cloning is cheap and every clone refers to the same pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer; it goes back to the pool when the guard is dropped.
    pub fn checkout(&self) -> PooledBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let buf = match reused {
            Some(buf) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; COPY_BUFFER_SIZE].into_boxed_slice()
            }
        };
        self.inner.in_use.fetch_add(1, Ordering::Relaxed);

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            idle: self
                .inner
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            in_use: self.inner.in_use.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

/// A checked-out buffer. Derefs to a `[u8]` of [`COPY_BUFFER_SIZE`] bytes.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::Relaxed);
        if let Some(buf) = self.buf.take() {
            let mut idle = self.pool.idle.lock().unwrap_or_else(PoisonError::into_inner);
            if idle.len() < self.pool.max_idle {
                idle.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(4);

        let first = pool.checkout();
        assert_eq!(first.len(), COPY_BUFFER_SIZE);
        let second = pool.checkout();
        assert_eq!(pool.stats().in_use, 2);
        drop(first);
        drop(second);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.in_use, 0);

        let _third = pool.checkout();
        let stats = pool.stats();
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_idle_limit() {
        let pool = BufferPool::new(1);
        let a = pool.checkout();
        let b = pool.checkout();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn test_clones_share_state() {
        let pool = BufferPool::new(2);
        let other = pool.clone();
        drop(other.checkout());
        assert_eq!(pool.stats().idle, 1);
    }
}
