//! Scenario: the event publishing queue delivers events to its sink in
//! strict FIFO order even when pushed from multiple threads, and
//! `on_idle` only returns once every push made before the call has
//! landed.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Integration test assertions use expect/unwrap for clarity."
)]

use std::sync::{Arc, Mutex};

use integration_sync::queue::{EventQueue, EventSink, QueuedEvent};

struct RecordingSink {
    seen: Arc<Mutex<Vec<String>>>,
}

impl EventSink for RecordingSink {
    fn deliver(&self, event: &QueuedEvent) -> Result<(), String> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.name.clone());
        Ok(())
    }
}

#[test]
fn single_producer_events_are_delivered_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = EventQueue::spawn(RecordingSink { seen: Arc::clone(&seen) });

    for i in 0..50 {
        queue
            .publish(QueuedEvent {
                name: format!("step_progress_{i}"),
                payload: serde_json::Value::Null,
            })
            .expect("publish succeeds");
    }
    queue.on_idle().expect("idle succeeds");

    let recorded = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let expected: Vec<String> = (0..50).map(|i| format!("step_progress_{i}")).collect();
    assert_eq!(*recorded, expected);
}

#[test]
fn on_idle_waits_for_events_pushed_before_the_call() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let queue = EventQueue::spawn(RecordingSink { seen: Arc::clone(&seen) });

    queue
        .publish(QueuedEvent {
            name: "step_start".to_string(),
            payload: serde_json::Value::Null,
        })
        .expect("publish succeeds");
    queue.on_idle().expect("idle succeeds");

    assert_eq!(
        *seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        vec!["step_start".to_string()]
    );
}
