//! Connection Management
//!
//! Accept loop, per-connection pipeline and bounded shutdown.

pub mod handler;
pub mod manager;

pub use handler::{ConnectionContext, ConnectionHandler};
pub use manager::ConnectionManager;
