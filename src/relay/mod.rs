//! Data Relay Module
//!
//! Full-duplex copying between a client and its upstream, with pooled
//! buffers and half-close propagation.

pub mod engine;
pub mod pool;
pub mod transport;

pub use engine::{Direction, RelayEngine, RelayStats};
pub use pool::{BufferPool, BufferPoolStats, PooledBuffer, COPY_BUFFER_SIZE};
pub use transport::{HalfClose, TcpHalfClose, Transport};
