use bytes::Bytes;
use modlink_wire::Packet;

use crate::connection::Connection;
use crate::error::Result;
use crate::registry::CallbackHandler;

/// A handle to one addressable hardware module behind the daemon.
///
/// This is the generic binding surface: device-specific bindings layer typed
/// call methods over [`Device::call`] and typed events over
/// [`Device::register_callback`]. Creating a device registers its stub in
/// the connection's registry; [`Device::deregister`] removes it. The stub is
/// also destroyed when the connection is torn down.
pub struct Device {
    uid: u32,
    device_type: u16,
    connection: Connection,
}

impl Device {
    pub fn new(uid: u32, device_type: u16, connection: &Connection) -> Self {
        connection.registry().register_device(uid, device_type);
        Self {
            uid,
            device_type,
            connection: connection.clone(),
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn device_type(&self) -> u16 {
        self.device_type
    }

    /// Invoke a device function, honoring the per-function response-expected
    /// table. Returns the response payload, or an empty payload for
    /// fire-and-forget functions.
    pub fn call(&self, function_id: u8, payload: impl Into<Bytes>) -> Result<Bytes> {
        let expected = self
            .connection
            .registry()
            .response_expected(self.uid, function_id)
            .unwrap_or(true);
        match self.connection.send(self.uid, function_id, payload, expected)? {
            Some(response) => Ok(response.payload),
            None => Ok(Bytes::new()),
        }
    }

    /// Invoke a device function and return the full response packet.
    pub fn call_raw(&self, function_id: u8, payload: impl Into<Bytes>) -> Result<Packet> {
        self.connection.request(self.uid, function_id, payload)
    }

    /// Override whether a response is requested for one function.
    ///
    /// Turning responses off trades delivery confirmation (and device error
    /// reporting) for latency on setter-style functions.
    pub fn set_response_expected(&self, function_id: u8, expected: bool) {
        self.connection
            .registry()
            .set_response_expected(self.uid, function_id, expected);
    }

    pub fn get_response_expected(&self, function_id: u8) -> bool {
        self.connection
            .registry()
            .response_expected(self.uid, function_id)
            .unwrap_or(true)
    }

    /// Register a callback handler. Last write wins for the same callback ID.
    pub fn register_callback(&self, callback_id: u8, handler: CallbackHandler) {
        self.connection
            .registry()
            .register_callback(self.uid, callback_id, handler);
    }

    /// Remove a callback handler. Only prevents future dispatch; an already
    /// queued invocation still runs.
    pub fn unregister_callback(&self, callback_id: u8) {
        self.connection
            .registry()
            .unregister_callback(self.uid, callback_id);
    }

    /// Remove this device's stub and all its handlers from the registry.
    pub fn deregister(self) {
        self.connection.registry().remove_device(self.uid);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn new_registers_stub() {
        let connection = Connection::new();
        let device = Device::new(42, 2107, &connection);
        assert!(connection.registry().contains(42));
        assert_eq!(connection.registry().device_type(42), Some(2107));
        assert_eq!(device.device_type(), 2107);
    }

    #[test]
    fn deregister_removes_stub() {
        let connection = Connection::new();
        let device = Device::new(42, 1, &connection);
        device.deregister();
        assert!(!connection.registry().contains(42));
    }

    #[test]
    fn response_expected_defaults_to_true() {
        let connection = Connection::new();
        let device = Device::new(1, 1, &connection);
        assert!(device.get_response_expected(5));

        device.set_response_expected(5, false);
        assert!(!device.get_response_expected(5));
    }

    #[test]
    fn callback_registration_goes_through_registry() {
        let connection = Connection::new();
        let device = Device::new(9, 1, &connection);
        device.register_callback(3, Arc::new(|_| {}));
        device.unregister_callback(3);
    }
}
