//! Client library for networked hardware modules behind a local daemon.
//!
//! modlink talks to a local broker daemon over one TCP socket, multiplexing
//! many independent hardware devices: synchronous request/response calls and
//! asynchronous push callbacks over the same connection.
//!
//! # Crate Structure
//!
//! - [`wire`] — Binary packet codec for the daemon wire protocol
//! - [`client`] — Connection management, request correlation, callback
//!   dispatch

/// Re-export wire types.
pub mod wire {
    pub use modlink_wire::*;
}

/// Re-export client types.
pub mod client {
    pub use modlink_client::*;
}
