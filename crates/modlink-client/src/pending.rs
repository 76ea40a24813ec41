use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use modlink_wire::Packet;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Number of sequence-number slots; matches the 5-bit wire field (1..=31).
pub const TABLE_CAPACITY: usize = 31;

/// Outcome delivered to a waiting caller.
enum Outcome {
    Response(Packet),
    Lost,
}

struct Slot {
    expected_function_id: u8,
    outcome: Option<Outcome>,
    issued_at: Instant,
}

struct Inner {
    slots: [Option<Slot>; TABLE_CAPACITY],
    /// Round-robin scan start (0-based index).
    next: usize,
}

/// Tracks in-flight request→response correlations by sequence number.
///
/// Slots are bounded by the wire format, so `allocate` returning `TableFull`
/// is the backpressure signal for too many concurrent synchronous calls.
/// A slot is consumed exactly once: by the matching response, by timeout, by
/// cancellation, or by connection loss. Every exit path releases the slot.
pub struct PendingTable {
    inner: Mutex<Inner>,
    resolved: Condvar,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: std::array::from_fn(|_| None),
                next: 0,
            }),
            resolved: Condvar::new(),
        }
    }

    /// Reserve the next free sequence number, round-robin over 1..=31.
    pub fn allocate(&self, expected_function_id: u8) -> Result<u8> {
        let mut inner = self.inner.lock().expect("pending table lock poisoned");
        let start = inner.next;
        for offset in 0..TABLE_CAPACITY {
            let index = (start + offset) % TABLE_CAPACITY;
            if inner.slots[index].is_none() {
                inner.slots[index] = Some(Slot {
                    expected_function_id,
                    outcome: None,
                    issued_at: Instant::now(),
                });
                inner.next = (index + 1) % TABLE_CAPACITY;
                return Ok(index as u8 + 1);
            }
        }
        Err(ClientError::TableFull)
    }

    /// Block until the matching response arrives, the timeout elapses, or the
    /// connection drops. All exit paths release the slot.
    pub fn wait(&self, sequence_number: u8, timeout: Duration) -> Result<Packet> {
        let index = slot_index(sequence_number)?;
        let deadline = Instant::now() + timeout;

        let mut inner = self.inner.lock().expect("pending table lock poisoned");
        loop {
            match &mut inner.slots[index] {
                None => return Err(ClientError::Cancelled),
                Some(slot) => {
                    if let Some(outcome) = slot.outcome.take() {
                        inner.slots[index] = None;
                        return match outcome {
                            Outcome::Response(packet) => Ok(packet),
                            Outcome::Lost => Err(ClientError::ConnectionLost),
                        };
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                inner.slots[index] = None;
                return Err(ClientError::Timeout(timeout));
            }

            let (guard, _timed_out) = self
                .resolved
                .wait_timeout(inner, deadline - now)
                .expect("pending table lock poisoned");
            inner = guard;
        }
    }

    /// Called by the reader loop for every received packet with a non-zero
    /// sequence number.
    ///
    /// Returns `None` when the packet was consumed as a response. Returns the
    /// packet back when no matching pending entry exists, so the caller can
    /// forward it to the device registry as a (possibly stray) callback.
    pub fn resolve(&self, packet: Packet) -> Option<Packet> {
        if packet.sequence_number == 0 {
            return Some(packet);
        }
        let Ok(index) = slot_index(packet.sequence_number) else {
            return Some(packet);
        };

        let mut inner = self.inner.lock().expect("pending table lock poisoned");
        match &mut inner.slots[index] {
            Some(slot) if slot.outcome.is_some() => {
                // The slot was already resolved but the waiter has not woken
                // yet. Consuming it twice would violate the single-use
                // contract, so the duplicate is logged and swallowed.
                warn!(
                    sequence_number = packet.sequence_number,
                    function_id = packet.function_id,
                    "duplicate response for pending request"
                );
                None
            }
            Some(slot) if slot.expected_function_id == packet.function_id => {
                debug!(
                    sequence_number = packet.sequence_number,
                    elapsed_ms = slot.issued_at.elapsed().as_millis() as u64,
                    "request resolved"
                );
                slot.outcome = Some(Outcome::Response(packet));
                self.resolved.notify_all();
                None
            }
            _ => Some(packet),
        }
    }

    /// Cancel a wait from another thread, releasing the slot immediately so
    /// the sequence number can be reused.
    pub fn cancel(&self, sequence_number: u8) {
        let Ok(index) = slot_index(sequence_number) else {
            return;
        };
        let mut inner = self.inner.lock().expect("pending table lock poisoned");
        if inner.slots[index].take().is_some() {
            self.resolved.notify_all();
        }
    }

    /// Release a slot that never got a waiter (e.g. the request write failed).
    pub fn release(&self, sequence_number: u8) {
        self.cancel(sequence_number);
    }

    /// Fail every outstanding request with `ConnectionLost` atomically.
    /// Each waiter observes the loss exactly once.
    pub fn abort_all(&self) {
        let mut inner = self.inner.lock().expect("pending table lock poisoned");
        let mut aborted = 0;
        for slot in inner.slots.iter_mut().flatten() {
            if slot.outcome.is_none() {
                slot.outcome = Some(Outcome::Lost);
                aborted += 1;
            }
        }
        if aborted > 0 {
            debug!(aborted, "aborted outstanding requests");
            self.resolved.notify_all();
        }
    }

    /// Number of currently occupied slots.
    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock().expect("pending table lock poisoned");
        inner.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

fn slot_index(sequence_number: u8) -> Result<usize> {
    if (1..=TABLE_CAPACITY as u8).contains(&sequence_number) {
        Ok(sequence_number as usize - 1)
    } else {
        Err(ClientError::Cancelled)
    }
}
