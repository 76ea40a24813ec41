use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use modlink_wire::{Packet, PacketReader, PacketWriter, WireError};
use tracing::{debug, error, info, warn};

use crate::dispatch::CallbackQueue;
use crate::error::{ClientError, DeviceError, Result};
use crate::pending::PendingTable;
use crate::registry::DeviceRegistry;

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 4223;

/// Default per-request timeout, matching typical local-daemon round trips.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);

/// Externally observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Auto-reconnect policy. Disabled by default.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles per failure.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 8,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Hook invoked after every successful automatic reconnect.
///
/// Devices are physically pluggable, so registry stubs may be stale after a
/// reconnect; the hook is where the host revalidates them against the
/// hardware that is actually present.
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync + 'static>;

struct Active {
    reader_thread: Option<JoinHandle<()>>,
    host: String,
    port: u16,
    generation: u64,
}

enum State {
    Disconnected,
    Connecting,
    Connected(Active),
    Disconnecting,
}

struct Settings {
    request_timeout: Duration,
    reconnect: ReconnectConfig,
    reconnect_hook: Option<ReconnectHook>,
}

struct Shared {
    state: Mutex<State>,
    /// Write half of the socket, behind its own lock so state queries and
    /// teardown never wait on a stalled socket write.
    writer: Mutex<Option<PacketWriter<TcpStream>>>,
    pending: PendingTable,
    registry: DeviceRegistry,
    queue: Arc<CallbackQueue>,
    settings: Mutex<Settings>,
    generation: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// A persistent session to the local daemon, multiplexing many devices over
/// one TCP socket.
///
/// Cloning is cheap and shares the session. Exactly one socket reader thread
/// is alive while the state is `Connected`; it correlates responses through
/// the pending-request table and feeds unsolicited packets to the callback
/// dispatch queue via the device registry.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Disconnected),
                writer: Mutex::new(None),
                pending: PendingTable::new(),
                registry: DeviceRegistry::new(),
                queue: Arc::new(CallbackQueue::new()),
                settings: Mutex::new(Settings {
                    request_timeout: DEFAULT_REQUEST_TIMEOUT,
                    reconnect: ReconnectConfig::default(),
                    reconnect_hook: None,
                }),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Connect to the daemon.
    ///
    /// Fails with `AlreadyConnected` unless the state is `Disconnected`, and
    /// with `ConnectFailed` on socket-level errors.
    pub fn connect(&self, host: &str, port: u16) -> Result<()> {
        {
            let mut state = self.shared.state.lock().expect("state lock poisoned");
            match *state {
                State::Disconnected => *state = State::Connecting,
                _ => return Err(ClientError::AlreadyConnected),
            }
        }

        match self.establish(host, port) {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut state = self.shared.state.lock().expect("state lock poisoned");
                if matches!(*state, State::Connecting) {
                    *state = State::Disconnected;
                }
                Err(err)
            }
        }
    }

    fn establish(&self, host: &str, port: u16) -> Result<()> {
        let connect_failed = |source: std::io::Error| ClientError::ConnectFailed {
            host: host.to_string(),
            port,
            source,
        };

        let stream = TcpStream::connect((host, port)).map_err(connect_failed)?;
        let _ = stream.set_nodelay(true);
        let reader_stream = stream.try_clone().map_err(connect_failed)?;

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut writer = self.shared.writer.lock().expect("writer lock poisoned");
            *writer = Some(PacketWriter::new(stream));
        }
        {
            // Publish the connected state before the reader starts so an
            // immediate EOF is handled as a loss, not swallowed mid-connect.
            let mut state = self.shared.state.lock().expect("state lock poisoned");
            *state = State::Connected(Active {
                reader_thread: None,
                host: host.to_string(),
                port,
                generation,
            });
        }

        let shared = Arc::clone(&self.shared);
        let reader_thread = thread::Builder::new()
            .name("modlink-reader".to_string())
            .spawn(move || reader_loop(shared, reader_stream, generation));
        let reader_thread = match reader_thread {
            Ok(handle) => handle,
            Err(source) => {
                self.disconnect();
                return Err(connect_failed(source));
            }
        };

        let mut state = self.shared.state.lock().expect("state lock poisoned");
        if let State::Connected(active) = &mut *state {
            if active.generation == generation {
                active.reader_thread = Some(reader_thread);
            }
        }
        info!(host, port, "connected to daemon");
        Ok(())
    }

    /// Tear down the connection. Idempotent: a no-op when already
    /// disconnected.
    pub fn disconnect(&self) {
        let mut active = {
            let mut state = self.shared.state.lock().expect("state lock poisoned");
            match std::mem::replace(&mut *state, State::Disconnecting) {
                State::Connected(active) => active,
                other => {
                    // Nothing to tear down; leave concurrent transitions alone.
                    *state = other;
                    return;
                }
            }
        };

        let writer = self
            .shared
            .writer
            .lock()
            .expect("writer lock poisoned")
            .take();
        if let Some(writer) = writer {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
        if let Some(handle) = active.reader_thread.take() {
            let _ = handle.join();
        }
        self.shared.pending.abort_all();
        self.shared.registry.clear();

        let mut state = self.shared.state.lock().expect("state lock poisoned");
        *state = State::Disconnected;
        info!("disconnected from daemon");
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        match *self.shared.state.lock().expect("state lock poisoned") {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
            State::Disconnecting => ConnectionState::Disconnecting,
        }
    }

    /// Send a request, waiting for the response when one is expected.
    pub fn send(
        &self,
        uid: u32,
        function_id: u8,
        payload: impl Into<Bytes>,
        response_expected: bool,
    ) -> Result<Option<Packet>> {
        if response_expected {
            self.request(uid, function_id, payload).map(Some)
        } else {
            self.send_fire_and_forget(uid, function_id, payload)
                .map(|()| None)
        }
    }

    /// Issue a synchronous request with the connection's default timeout.
    pub fn request(&self, uid: u32, function_id: u8, payload: impl Into<Bytes>) -> Result<Packet> {
        let timeout = self.request_timeout();
        self.request_with_timeout(uid, function_id, payload, timeout)
    }

    /// Issue a synchronous request: allocate a sequence number, write, and
    /// block until the correlated response, a timeout, or connection loss.
    ///
    /// Blocks only the calling thread, never the reader loop.
    pub fn request_with_timeout(
        &self,
        uid: u32,
        function_id: u8,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Packet> {
        let sequence_number = self.shared.pending.allocate(function_id)?;
        let packet = match Packet::new(uid, function_id, sequence_number, true, payload.into()) {
            Ok(packet) => packet,
            Err(err) => {
                self.shared.pending.release(sequence_number);
                return Err(err.into());
            }
        };

        if let Err(err) = self.write_packet(&packet) {
            self.shared.pending.release(sequence_number);
            return Err(err);
        }

        let response = self.shared.pending.wait(sequence_number, timeout)?;
        match DeviceError::from_code(response.error_code) {
            Some(device_error) => Err(ClientError::Device(device_error)),
            None => Ok(response),
        }
    }

    /// Write a request without expecting a response.
    ///
    /// The only delivery guarantee is "accepted by the local socket buffer".
    pub fn send_fire_and_forget(
        &self,
        uid: u32,
        function_id: u8,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let packet = Packet::new(uid, function_id, 0, false, payload.into())?;
        self.write_packet(&packet)
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.shared.writer.lock().expect("writer lock poisoned");
        match writer.as_mut() {
            Some(writer) => writer.write_packet(packet).map_err(|err| match err {
                WireError::ConnectionClosed | WireError::Io(_) => ClientError::ConnectionLost,
                other => ClientError::Wire(other),
            }),
            None => Err(ClientError::NotConnected),
        }
    }

    /// The device registry backing this connection.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.shared.registry
    }

    /// Number of requests currently in flight.
    pub fn requests_in_flight(&self) -> usize {
        self.shared.pending.in_flight()
    }

    /// Pull-style callback integration: drain queued callbacks, blocking up
    /// to `timeout` for the first one. Returns how many handlers ran.
    pub fn dispatch_callbacks(&self, timeout: Duration) -> usize {
        self.shared.queue.pump(timeout)
    }

    /// Push-style callback integration: run dispatch on a dedicated thread
    /// for the lifetime of this connection.
    pub fn spawn_callback_dispatcher(&self) -> JoinHandle<()> {
        self.shared.queue.spawn_dispatcher()
    }

    /// Per-request timeout used by [`Connection::request`].
    pub fn request_timeout(&self) -> Duration {
        self.shared
            .settings
            .lock()
            .expect("settings lock poisoned")
            .request_timeout
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        self.shared
            .settings
            .lock()
            .expect("settings lock poisoned")
            .request_timeout = timeout;
    }

    /// Configure automatic reconnection after unexpected connection loss.
    pub fn set_auto_reconnect(&self, config: ReconnectConfig) {
        self.shared
            .settings
            .lock()
            .expect("settings lock poisoned")
            .reconnect = config;
    }

    pub fn auto_reconnect(&self) -> ReconnectConfig {
        self.shared
            .settings
            .lock()
            .expect("settings lock poisoned")
            .reconnect
            .clone()
    }

    /// Install the re-enumeration hook run after each successful automatic
    /// reconnect.
    pub fn set_reconnect_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared
            .settings
            .lock()
            .expect("settings lock poisoned")
            .reconnect_hook = Some(Arc::new(hook));
    }
}

/// One instance per live connection; owns the read half of the socket.
fn reader_loop(shared: Arc<Shared>, stream: TcpStream, generation: u64) {
    let mut reader = PacketReader::new(stream);
    loop {
        match reader.read_packet() {
            Ok(packet) => route_packet(&shared, packet),
            Err(err) => {
                handle_connection_loss(&shared, generation, &err);
                return;
            }
        }
    }
}

/// Dispatch order: a non-zero sequence number with a live pending entry is a
/// response; everything else is a callback for the device registry.
fn route_packet(shared: &Shared, packet: Packet) {
    debug!(
        uid = packet.uid,
        function_id = packet.function_id,
        sequence_number = packet.sequence_number,
        payload_len = packet.payload.len(),
        "packet received"
    );

    let stray = if packet.sequence_number != 0 {
        match shared.pending.resolve(packet) {
            None => return,
            Some(packet) => packet,
        }
    } else {
        packet
    };

    shared
        .registry
        .dispatch(&shared.queue, stray.uid, stray.function_id, stray.payload);
}

fn handle_connection_loss(shared: &Arc<Shared>, generation: u64, err: &WireError) {
    let (host, port) = {
        let mut state = shared.state.lock().expect("state lock poisoned");
        let ours = matches!(
            &*state,
            State::Connected(active) if active.generation == generation
        );
        if !ours {
            // A deliberate disconnect (or a newer connection) owns cleanup.
            return;
        }
        let State::Connected(active) = std::mem::replace(&mut *state, State::Disconnected) else {
            return;
        };
        (active.host.clone(), active.port)
    };
    shared
        .writer
        .lock()
        .expect("writer lock poisoned")
        .take();

    warn!(%err, host = %host, port, "connection lost");
    shared.pending.abort_all();

    let config = shared
        .settings
        .lock()
        .expect("settings lock poisoned")
        .reconnect
        .clone();
    if config.enabled {
        let shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("modlink-reconnect".to_string())
            .spawn(move || reconnect_loop(shared, host, port, config));
        if let Err(err) = spawned {
            error!(%err, "failed to spawn reconnect supervisor");
        }
    }
}

fn reconnect_loop(shared: Arc<Shared>, host: String, port: u16, config: ReconnectConfig) {
    let connection = Connection { shared };
    let mut backoff = config.initial_backoff;

    for attempt in 1..=config.max_attempts {
        thread::sleep(backoff);
        match connection.connect(&host, port) {
            Ok(()) => {
                info!(attempt, host = %host, port, "reconnected to daemon");
                let hook = connection
                    .shared
                    .settings
                    .lock()
                    .expect("settings lock poisoned")
                    .reconnect_hook
                    .clone();
                if let Some(hook) = hook {
                    hook();
                }
                return;
            }
            Err(ClientError::AlreadyConnected) => {
                debug!("connection re-established elsewhere; stopping reconnect");
                return;
            }
            Err(err) => {
                warn!(attempt, %err, "reconnect attempt failed");
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }

    error!(
        attempts = config.max_attempts,
        host = %host,
        port,
        "exhausted reconnect attempts; staying disconnected"
    );
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn local_listener() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string(), addr.port())
    }

    #[test]
    fn connect_transitions_to_connected() {
        let (listener, host, port) = local_listener();
        let connection = Connection::new();

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        connection.connect(&host, port).unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);

        drop(listener);
        connection.disconnect();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_twice_fails() {
        let (_listener, host, port) = local_listener();
        let connection = Connection::new();
        connection.connect(&host, port).unwrap();

        let err = connection.connect(&host, port).unwrap_err();
        assert!(matches!(err, ClientError::AlreadyConnected));

        connection.disconnect();
    }

    #[test]
    fn connect_to_closed_port_fails() {
        let (listener, host, port) = local_listener();
        drop(listener);

        let connection = Connection::new();
        let err = connection.connect(&host, port).unwrap_err();
        assert!(matches!(err, ClientError::ConnectFailed { .. }));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let connection = Connection::new();
        connection.disconnect();
        connection.disconnect();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_while_disconnected_fails() {
        let connection = Connection::new();
        let err = connection
            .send_fire_and_forget(1, 1, &b"x"[..])
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn oversized_payload_releases_slot() {
        let connection = Connection::new();

        // Exhausting would take 31 leaks; every attempt must give its slot back.
        for _ in 0..crate::pending::TABLE_CAPACITY {
            let err = connection.request(1, 1, vec![0u8; 65]).unwrap_err();
            assert!(matches!(
                err,
                ClientError::Wire(WireError::PayloadTooLarge { .. })
            ));
        }
        assert_eq!(connection.requests_in_flight(), 0);

        // The table is still usable: the next failure is about connectivity,
        // not capacity.
        let err = connection.request(1, 1, &b"x"[..]).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn send_after_disconnect_fails() {
        let (_listener, host, port) = local_listener();
        let connection = Connection::new();
        connection.connect(&host, port).unwrap();
        connection.disconnect();

        let err = connection
            .send_fire_and_forget(1, 1, &b"x"[..])
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn request_while_disconnected_releases_slot() {
        let connection = Connection::new();
        let err = connection.request(1, 1, &b"x"[..]).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert_eq!(connection.requests_in_flight(), 0);
    }

    #[test]
    fn disconnect_clears_registry() {
        let (_listener, host, port) = local_listener();
        let connection = Connection::new();
        connection.connect(&host, port).unwrap();
        connection.registry().register_device(7, 42);

        connection.disconnect();
        assert!(!connection.registry().contains(7));
    }
}
