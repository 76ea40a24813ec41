use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{error, warn};

use crate::registry::CallbackHandler;

/// Queue depth above which crossing a power-of-two boundary is logged.
/// The queue itself stays unbounded; the host controls depth by pumping.
const DEPTH_WARN_FLOOR: usize = 1024;

struct QueuedCallback {
    handler: CallbackHandler,
    payload: Bytes,
}

struct Inner {
    items: VecDeque<QueuedCallback>,
    closed: bool,
}

/// Ordered FIFO decoupling "a packet arrived" from "user code runs".
///
/// Fed by the reader loop; drained either by a dedicated dispatcher thread
/// ([`CallbackQueue::spawn_dispatcher`], push model) or by explicit
/// [`CallbackQueue::pump`] calls from the host's own loop (pull model).
/// Arrival order is preserved. A handler that panics is caught at the
/// dispatch boundary and never stops subsequent dispatch.
pub struct CallbackQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a handler invocation. Dropped if the queue is closed.
    pub fn push(&self, handler: CallbackHandler, payload: Bytes) {
        let mut inner = self.inner.lock().expect("callback queue lock poisoned");
        if inner.closed {
            return;
        }
        inner.items.push_back(QueuedCallback { handler, payload });
        let depth = inner.items.len();
        if depth >= DEPTH_WARN_FLOOR && depth.is_power_of_two() {
            warn!(depth, "callback queue backlog growing; host is pumping too slowly");
        }
        self.available.notify_one();
    }

    /// Drain everything currently queued, blocking up to `timeout` for the
    /// first item. Returns the number of handlers run.
    pub fn pump(&self, timeout: Duration) -> usize {
        let mut ran = 0usize;
        loop {
            let item = {
                let mut inner = self.inner.lock().expect("callback queue lock poisoned");
                if inner.items.is_empty() {
                    if ran > 0 || inner.closed {
                        return ran;
                    }
                    let (guard, result) = self
                        .available
                        .wait_timeout(inner, timeout)
                        .expect("callback queue lock poisoned");
                    inner = guard;
                    if result.timed_out() && inner.items.is_empty() {
                        return ran;
                    }
                }
                inner.items.pop_front()
            };

            // Handlers run without the queue lock held; user code may call
            // back into the library.
            if let Some(item) = item {
                run_handler(item);
                ran += 1;
            }
        }
    }

    /// Drain until the queue is closed.
    pub fn pump_forever(&self) {
        loop {
            let item = {
                let mut inner = self.inner.lock().expect("callback queue lock poisoned");
                loop {
                    if let Some(item) = inner.items.pop_front() {
                        break Some(item);
                    }
                    if inner.closed {
                        break None;
                    }
                    inner = self
                        .available
                        .wait(inner)
                        .expect("callback queue lock poisoned");
                }
            };
            match item {
                Some(item) => run_handler(item),
                None => return,
            }
        }
    }

    /// Run `pump_forever` on a dedicated dispatcher thread.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let queue = Arc::clone(self);
        thread::Builder::new()
            .name("modlink-dispatch".to_string())
            .spawn(move || queue.pump_forever())
            .expect("failed to spawn dispatcher thread")
    }

    /// Close the queue: pending items still drain, new pushes are dropped,
    /// and `pump_forever` returns once empty.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("callback queue lock poisoned");
        inner.closed = true;
        self.available.notify_all();
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("callback queue lock poisoned");
        inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn run_handler(item: QueuedCallback) {
    let QueuedCallback { handler, payload } = item;
    // One misbehaving callback must not corrupt the session.
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(panic = %message, "callback handler panicked; continuing dispatch");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> CallbackHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn pump_runs_queued_handlers_in_order() {
        let queue = CallbackQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in [1u8, 2, 3] {
            let order = Arc::clone(&order);
            queue.push(
                Arc::new(move |_| order.lock().unwrap().push(tag)),
                Bytes::new(),
            );
        }

        assert_eq!(queue.pump(Duration::from_millis(10)), 3);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn pump_times_out_on_empty_queue() {
        let queue = CallbackQueue::new();
        let started = std::time::Instant::now();
        assert_eq!(queue.pump(Duration::from_millis(30)), 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let queue = CallbackQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        queue.push(Arc::new(|_| panic!("handler fault")), Bytes::new());
        queue.push(counting_handler(&counter), Bytes::new());

        assert_eq!(queue.pump(Duration::from_millis(10)), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatcher_thread_drains_until_close() {
        let queue = Arc::new(CallbackQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let dispatcher = queue.spawn_dispatcher();
        for _ in 0..10 {
            queue.push(counting_handler(&counter), Bytes::new());
        }

        // Close drains remaining items before the dispatcher exits.
        queue.close();
        dispatcher.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn push_after_close_is_dropped() {
        let queue = CallbackQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        queue.close();
        queue.push(counting_handler(&counter), Bytes::new());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn payload_reaches_handler() {
        let queue = CallbackQueue::new();
        let seen = Arc::new(Mutex::new(None));

        {
            let seen = Arc::clone(&seen);
            queue.push(
                Arc::new(move |payload: Bytes| {
                    *seen.lock().unwrap() = Some(payload);
                }),
                Bytes::from_static(b"test"),
            );
        }

        queue.pump(Duration::from_millis(10));
        let payload = seen.lock().unwrap().take().unwrap();
        assert_eq!(payload.as_ref(), b"test");
    }
}
