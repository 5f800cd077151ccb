// crates/integration-sync/src/queue.rs
// ============================================================================
// Module: queue
// Description: Ordered, single-worker event publishing queue (C4).
//              Events are pushed from any thread and drained strictly
//              FIFO by one background worker, with retry/backoff on
//              delivery failure. on_idle blocks until everything pushed
//              so far has been delivered.
// Dependencies: std::sync::mpsc, std::thread, tracing
// ============================================================================

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use integration_core::logger::EventPublisher;

/// A single event accepted by the queue for ordered delivery.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Logical event name, e.g. `"step_start"` or `"entity_created"`.
    pub name: String,
    /// JSON-serializable payload.
    pub payload: serde_json::Value,
}

/// A message sent to the worker thread over the internal channel.
enum Command {
    /// Deliver one event through the sink.
    Deliver(QueuedEvent),
    /// Signal the given barrier once every command queued before this
    /// one has been processed.
    Idle(Arc<(Mutex<bool>, Condvar)>),
}

/// How many times the worker retries a single event delivery before
/// giving up and dropping it (logging the drop).
const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Base backoff between retries; scaled by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Something that can deliver a single [`QueuedEvent`], e.g. an HTTP
/// call to the remote synchronization API's event endpoint.
pub trait EventSink: Send + 'static {
    /// Attempts one delivery of `event`.
    ///
    /// # Errors
    /// Returns an error description on failure; the queue will retry up
    /// to [`MAX_DELIVERY_ATTEMPTS`] times with backoff before dropping
    /// the event.
    fn deliver(&self, event: &QueuedEvent) -> Result<(), String>;
}

/// Ordered, single-worker FIFO event queue.
///
/// # Invariants
/// - Events are delivered to the sink in the exact order they were
///   pushed; the worker never reorders or parallelizes delivery.
pub struct EventQueue {
    /// Channel handle used to enqueue commands for the worker thread.
    sender: Sender<Command>,
    /// Handle to the worker thread, joined on drop.
    worker: Option<JoinHandle<()>>,
}

impl EventQueue {
    /// Spawns the background worker that will drain events pushed to
    /// this queue, delivering each through `sink` in order.
    pub fn spawn(sink: impl EventSink) -> Self {
        let (sender, receiver): (Sender<Command>, Receiver<Command>) = mpsc::channel();
        let worker = std::thread::spawn(move || Self::run_worker(&receiver, &sink));
        Self {
            sender,
            worker: Some(worker),
        }
    }

    /// Drains `receiver` until the channel closes, delivering events
    /// through `sink` in order and retrying transient failures.
    fn run_worker(receiver: &Receiver<Command>, sink: &impl EventSink) {
        for command in receiver {
            match command {
                Command::Deliver(event) => {
                    let mut attempt = 0;
                    loop {
                        attempt += 1;
                        match sink.deliver(&event) {
                            Ok(()) => break,
                            Err(reason) if attempt < MAX_DELIVERY_ATTEMPTS => {
                                tracing::warn!(
                                    event = event.name.as_str(),
                                    attempt,
                                    reason = reason.as_str(),
                                    "event delivery failed, retrying"
                                );
                                std::thread::sleep(RETRY_BACKOFF * attempt);
                            }
                            Err(reason) => {
                                tracing::error!(
                                    event = event.name.as_str(),
                                    reason = reason.as_str(),
                                    "event delivery failed after max attempts, dropping"
                                );
                                break;
                            }
                        }
                    }
                }
                Command::Idle(signal) => {
                    let (lock, condvar) = &*signal;
                    let mut done = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    *done = true;
                    condvar.notify_all();
                }
            }
        }
    }

    /// Enqueues an event for ordered delivery. Returns immediately
    /// without waiting for delivery.
    ///
    /// # Errors
    /// Returns [`crate::errors::SyncError::QueueClosed`] if the worker
    /// thread has already stopped.
    pub fn publish(&self, event: QueuedEvent) -> Result<(), crate::errors::SyncError> {
        self.sender
            .send(Command::Deliver(event))
            .map_err(|_send_error| crate::errors::SyncError::QueueClosed)
    }

    /// Blocks until every event pushed before this call has been
    /// delivered (or dropped after exhausting retries).
    ///
    /// # Errors
    /// Returns [`crate::errors::SyncError::QueueClosed`] if the worker
    /// thread has already stopped.
    pub fn on_idle(&self) -> Result<(), crate::errors::SyncError> {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        self.sender
            .send(Command::Idle(Arc::clone(&signal)))
            .map_err(|_send_error| crate::errors::SyncError::QueueClosed)?;
        let (lock, condvar) = &*signal;
        let guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _unused = condvar
            .wait_while(guard, |done| !*done)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(())
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.join());
        }
    }
}

/// Adapts a shared [`EventQueue`] to [`EventPublisher`], so a
/// [`integration_core::logger::TracingLogger`] can forward its published
/// events into the remote delivery pipeline. Swallows `QueueClosed`
/// (logging a warning) since `EventPublisher::publish` has no `Result`
/// return to surface it through.
pub struct EventQueuePublisher {
    /// The underlying queue events are forwarded into.
    queue: Arc<EventQueue>,
}

impl EventQueuePublisher {
    /// Wraps `queue` for use as an [`EventPublisher`].
    #[must_use]
    pub const fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }
}

impl EventPublisher for EventQueuePublisher {
    fn publish(&self, name: &str, payload: serde_json::Value) {
        let event = QueuedEvent {
            name: name.to_string(),
            payload,
        };
        if let Err(err) = self.queue.publish(event) {
            tracing::warn!(event = name, error = %err, "failed to enqueue event");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl EventSink for CountingSink {
        fn deliver(&self, event: &QueuedEvent) -> Result<(), String> {
            self.delivered
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.name.clone());
            Ok(())
        }
    }

    #[test]
    fn delivers_events_in_fifo_order() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let queue = EventQueue::spawn(CountingSink {
            delivered: Arc::clone(&delivered),
        });
        for i in 0..10 {
            queue
                .publish(QueuedEvent {
                    name: format!("event-{i}"),
                    payload: serde_json::Value::Null,
                })
                .expect("publish succeeds");
        }
        queue.on_idle().expect("idle succeeds");
        let names = delivered.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let expected: Vec<String> = (0..10).map(|i| format!("event-{i}")).collect();
        assert_eq!(*names, expected);
    }

    struct FlakySink {
        failures_remaining: AtomicUsize,
    }

    impl EventSink for FlakySink {
        fn deliver(&self, _event: &QueuedEvent) -> Result<(), String> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err("transient".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn retries_before_succeeding() {
        let queue = EventQueue::spawn(FlakySink {
            failures_remaining: AtomicUsize::new(1),
        });
        queue
            .publish(QueuedEvent {
                name: "flaky".to_string(),
                payload: serde_json::Value::Null,
            })
            .expect("publish succeeds");
        queue.on_idle().expect("idle succeeds");
    }
}
