use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::debug;

use crate::dispatch::CallbackQueue;

/// A registered callback handler.
///
/// Handlers are shared (`Arc`) so a handler already queued for execution
/// keeps running even if it is unregistered mid-flight; unregistration only
/// prevents future dispatch.
pub type CallbackHandler = Arc<dyn Fn(Bytes) + Send + Sync + 'static>;

struct DeviceEntry {
    device_type: u16,
    handlers: HashMap<u8, CallbackHandler>,
    response_expected: HashMap<u8, bool>,
}

impl DeviceEntry {
    fn new(device_type: u16) -> Self {
        Self {
            device_type,
            handlers: HashMap::new(),
            response_expected: HashMap::new(),
        }
    }
}

/// Maps device UIDs to locally-registered device stubs and their callback
/// handlers.
///
/// Owned by the connection; stubs are created when the caller instantiates a
/// device binding and destroyed when explicitly deregistered or when the
/// connection is torn down.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<u32, DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device stub. Replaces any existing stub for the UID.
    pub fn register_device(&self, uid: u32, device_type: u16) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        devices.insert(uid, DeviceEntry::new(device_type));
    }

    /// Remove a device stub and all its handlers.
    pub fn remove_device(&self, uid: u32) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        devices.remove(&uid);
    }

    /// Remove every stub (connection teardown).
    pub fn clear(&self) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        devices.clear();
    }

    /// Whether a stub is registered for the UID.
    pub fn contains(&self, uid: u32) -> bool {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices.contains_key(&uid)
    }

    /// The registered device type, if the stub exists.
    pub fn device_type(&self, uid: u32) -> Option<u16> {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices.get(&uid).map(|entry| entry.device_type)
    }

    /// UIDs of all registered stubs, for post-reconnect revalidation.
    pub fn device_uids(&self) -> Vec<u32> {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices.keys().copied().collect()
    }

    /// Register a handler for (uid, callback_id). Last write wins, no
    /// stacking. Creates the stub implicitly if the device is unknown.
    pub fn register_callback(&self, uid: u32, callback_id: u8, handler: CallbackHandler) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        devices
            .entry(uid)
            .or_insert_with(|| DeviceEntry::new(0))
            .handlers
            .insert(callback_id, handler);
    }

    /// Remove a handler. Prevents future dispatch only; a handler already
    /// queued still runs.
    pub fn unregister_callback(&self, uid: u32, callback_id: u8) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        if let Some(entry) = devices.get_mut(&uid) {
            entry.handlers.remove(&callback_id);
        }
    }

    /// Override the response-expected flag for one function of one device.
    pub fn set_response_expected(&self, uid: u32, function_id: u8, expected: bool) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        if let Some(entry) = devices.get_mut(&uid) {
            entry.response_expected.insert(function_id, expected);
        }
    }

    /// The response-expected flag for one function, if overridden.
    pub fn response_expected(&self, uid: u32, function_id: u8) -> Option<bool> {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices
            .get(&uid)
            .and_then(|entry| entry.response_expected.get(&function_id).copied())
    }

    /// Look up the handler for (uid, callback_id) and submit it to the
    /// dispatch queue. A missing handler is the normal case for callbacks
    /// nobody subscribed to; the packet is silently dropped.
    ///
    /// Returns whether a handler was queued.
    pub fn dispatch(
        &self,
        queue: &CallbackQueue,
        uid: u32,
        callback_id: u8,
        payload: Bytes,
    ) -> bool {
        let handler = {
            let devices = self.devices.lock().expect("device registry lock poisoned");
            devices
                .get(&uid)
                .and_then(|entry| entry.handlers.get(&callback_id))
                .cloned()
        };
        match handler {
            Some(handler) => {
                queue.push(handler, payload);
                true
            }
            None => {
                debug!(uid, callback_id, "callback without registered handler dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn register_and_remove_device() {
        let registry = DeviceRegistry::new();
        registry.register_device(42, 2107);
        assert!(registry.contains(42));
        assert_eq!(registry.device_type(42), Some(2107));

        registry.remove_device(42);
        assert!(!registry.contains(42));
    }

    #[test]
    fn last_registration_wins() {
        let registry = DeviceRegistry::new();
        let queue = CallbackQueue::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        {
            let first = Arc::clone(&first);
            registry.register_callback(1, 8, Arc::new(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            }));
        }
        {
            let second = Arc::clone(&second);
            registry.register_callback(1, 8, Arc::new(move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(registry.dispatch(&queue, 1, 8, Bytes::new()));
        queue.pump(std::time::Duration::from_millis(100));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_without_handler_is_a_silent_drop() {
        let registry = DeviceRegistry::new();
        let queue = CallbackQueue::new();
        assert!(!registry.dispatch(&queue, 99, 1, Bytes::from_static(b"x")));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn unregister_prevents_future_dispatch() {
        let registry = DeviceRegistry::new();
        let queue = CallbackQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = Arc::clone(&calls);
            registry.register_callback(1, 2, Arc::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(registry.dispatch(&queue, 1, 2, Bytes::new()));
        registry.unregister_callback(1, 2);
        assert!(!registry.dispatch(&queue, 1, 2, Bytes::new()));

        // The already-queued handler still runs after unregistration.
        queue.pump(std::time::Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn response_expected_overrides() {
        let registry = DeviceRegistry::new();
        registry.register_device(7, 1);
        assert_eq!(registry.response_expected(7, 1), None);

        registry.set_response_expected(7, 1, false);
        assert_eq!(registry.response_expected(7, 1), Some(false));

        registry.set_response_expected(7, 1, true);
        assert_eq!(registry.response_expected(7, 1), Some(true));
    }

    #[test]
    fn clear_removes_everything() {
        let registry = DeviceRegistry::new();
        registry.register_device(1, 1);
        registry.register_device(2, 2);
        registry.clear();
        assert!(registry.device_uids().is_empty());
    }
}
