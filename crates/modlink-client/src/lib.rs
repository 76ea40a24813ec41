//! Connection management and request multiplexing for the modlink daemon.
//!
//! This is the "just works" layer. One persistent TCP session multiplexes
//! many independent hardware devices: synchronous calls are correlated with
//! their responses by sequence number, and asynchronous push callbacks from
//! any device are delivered through an ordered dispatch queue that isolates
//! user-code faults from the socket reader.

pub mod connection;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod pending;
pub mod registry;

pub use connection::{
    Connection, ConnectionState, ReconnectConfig, ReconnectHook, DEFAULT_PORT,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use device::Device;
pub use dispatch::CallbackQueue;
pub use error::{ClientError, DeviceError, Result};
pub use pending::{PendingTable, TABLE_CAPACITY};
pub use registry::{CallbackHandler, DeviceRegistry};
