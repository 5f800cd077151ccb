// crates/integration-core/src/logger.rs
// ============================================================================
// Module: logger
// Description: The Logger interface every step handler and the
//              orchestrator are invoked with (per the external interface
//              contract), plus a `tracing`-backed implementation and the
//              timeOperation helper.
// Dependencies: tracing
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::errors::FrameworkError;
use crate::model::Step;

/// A lifecycle or diagnostic event the framework publishes through a
/// [`Logger`], destined for both structured logs and the remote event
/// stream (§4.4's event publishing queue).
#[derive(Debug, Clone)]
pub enum LoggerEvent {
    /// A free-form informational event with a message.
    Info {
        /// Human-readable message.
        message: String,
    },
    /// A named lifecycle event, e.g. `publishEvent({name, description})`
    /// from §6: step transitions, validation failures, upload progress.
    Named {
        /// Logical event name, e.g. `"step_start"`.
        name: String,
        /// Human-readable description.
        description: String,
    },
    /// An error event, already classified.
    Error {
        /// The underlying framework error.
        error: String,
        /// The error's wire code.
        error_code: &'static str,
    },
    /// A numeric metric, e.g. step duration in milliseconds.
    Metric {
        /// Metric name.
        name: String,
        /// Metric value.
        value: f64,
        /// Unit label, e.g. `"Milliseconds"`.
        unit: &'static str,
    },
}

/// Something a bound [`Logger`] funnels its published events into once
/// wired to a remote delivery channel, e.g. the synchronization event
/// publishing queue (C4). Kept as a trait here, rather than depending on
/// the queue's crate directly, so this crate stays free of a network
/// dependency.
pub trait EventPublisher: Send + Sync {
    /// Enqueues one named event with its JSON payload for ordered
    /// delivery. Must not block the caller on the delivery itself.
    fn publish(&self, name: &str, payload: serde_json::Value);
}

/// The logging/event-publishing surface every step handler and the
/// orchestrator receive. Implementations decide how `info`/`warn`/`error`
/// map onto an underlying log sink, and how `publish_event` reaches the
/// remote event stream.
///
/// # Invariants
/// - `child` returns a logger whose bindings are a superset of `self`'s;
///   implementations must not drop inherited bindings.
pub trait Logger: Send + Sync {
    /// Logs an informational message.
    fn info(&self, message: &str);
    /// Logs a warning message.
    fn warn(&self, message: &str);
    /// Logs an error message.
    fn error(&self, message: &str);
    /// Logs a trace-level message.
    fn trace(&self, message: &str);
    /// Returns a scoped logger with additional structured bindings.
    fn child(&self, bindings: &[(&str, &str)]) -> Box<dyn Logger>;
    /// Publishes a lifecycle/diagnostic event to the remote event stream.
    fn publish_event(&self, event: LoggerEvent);
    /// Publishes an error event, deciding whether it is already "handled"
    /// (logged with full detail at the raise site) based on the error's
    /// kind.
    fn publish_error_event(&self, error: &FrameworkError) {
        self.publish_event(LoggerEvent::Error {
            error: error.to_string(),
            error_code: error.kind().code(),
        });
    }
    /// Publishes a numeric metric.
    fn publish_metric(&self, name: &str, value: f64, unit: &'static str) {
        self.publish_event(LoggerEvent::Metric {
            name: name.to_string(),
            value,
            unit,
        });
    }

    /// Logs and publishes that `step` has begun executing.
    fn step_start(&self, step: &Step) {
        self.info(&format!("step started: {}", step.id));
        self.publish_event(LoggerEvent::Named {
            name: "step_start".to_string(),
            description: format!("step \"{}\" started", step.name),
        });
    }

    /// Logs and publishes that `step` completed successfully.
    fn step_success(&self, step: &Step) {
        self.info(&format!("step completed: {}", step.id));
        self.publish_event(LoggerEvent::Named {
            name: "step_end".to_string(),
            description: format!("step \"{}\" completed", step.name),
        });
    }

    /// Logs and publishes that `step` failed with `error`.
    fn step_failure(&self, step: &Step, error: &FrameworkError) {
        self.error(&format!("step failed: {} ({error})", step.id));
        self.publish_error_event(error);
        self.publish_event(LoggerEvent::Named {
            name: "step_failure".to_string(),
            description: format!("step \"{}\" failed: {error}", step.name),
        });
    }

    /// Logs and publishes a provider/validation failure raised outside a
    /// step's own execution (e.g. `validateInvocation`).
    fn validation_failure(&self, error: &FrameworkError) {
        self.error(&format!("validation failed: {error}"));
        self.publish_error_event(error);
        self.publish_event(LoggerEvent::Named {
            name: "validation_failure".to_string(),
            description: error.to_string(),
        });
    }

    /// Logs and publishes that a synchronization upload batch has begun
    /// for `job_id`.
    fn synchronization_upload_start(&self, job_id: &str) {
        self.info(&format!("synchronization upload started for job \"{job_id}\""));
        self.publish_event(LoggerEvent::Named {
            name: "sync_upload_start".to_string(),
            description: format!("upload started for job \"{job_id}\""),
        });
    }

    /// Logs and publishes that every synchronization upload batch for
    /// `job_id` has completed.
    fn synchronization_upload_end(&self, job_id: &str) {
        self.info(&format!("synchronization upload finished for job \"{job_id}\""));
        self.publish_event(LoggerEvent::Named {
            name: "sync_upload_end".to_string(),
            description: format!("upload finished for job \"{job_id}\""),
        });
    }

    /// Whether `error` is already "handled" — logged with full detail at
    /// its raise site, so a top-level catch should not re-log it as a
    /// fresh unexpected error.
    fn is_handled_error(&self, error: &FrameworkError) -> bool {
        error.kind().is_handled()
    }
}

/// A [`Logger`] implementation backed by the `tracing` crate. Bindings
/// accumulated through `child` are rendered as a prefix on every message
/// rather than as a live `tracing::Span`, keeping the type `Clone`-free
/// and trivially composable across threads.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    /// Structured key/value bindings accumulated through `child`,
    /// rendered as a message prefix.
    bindings: Vec<(String, String)>,
    /// Remote event channel this logger funnels published events into,
    /// once bound via [`TracingLogger::bound_to`].
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl TracingLogger {
    /// Creates a root logger with no bindings and no bound event
    /// channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root logger whose published events are also funneled
    /// into `publisher` (e.g. the synchronization event queue).
    #[must_use]
    pub fn bound_to(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            bindings: Vec::new(),
            publisher: Some(publisher),
        }
    }

    /// Renders this logger's bindings as a `"[k=v k2=v2] "` prefix, or
    /// an empty string if there are none.
    fn scope(&self) -> String {
        if self.bindings.is_empty() {
            return String::new();
        }
        let rendered: Vec<String> = self
            .bindings
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("[{}] ", rendered.join(" "))
    }

    /// Forwards `event` onto the bound event channel, if any, as a
    /// `(name, payload)` pair.
    fn forward_to_publisher(&self, event: &LoggerEvent) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let (name, payload) = match event {
            LoggerEvent::Info { message } => ("info", serde_json::json!({ "message": message })),
            LoggerEvent::Named { name, description } => {
                (name.as_str(), serde_json::json!({ "description": description }))
            }
            LoggerEvent::Error { error, error_code } => {
                ("error", serde_json::json!({ "error": error, "errorCode": error_code }))
            }
            LoggerEvent::Metric { name, value, unit } => {
                ("metric", serde_json::json!({ "name": name, "value": value, "unit": unit }))
            }
        };
        publisher.publish(name, payload);
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!("{}{}", self.scope(), message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}{}", self.scope(), message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}{}", self.scope(), message);
    }

    fn trace(&self, message: &str) {
        tracing::trace!("{}{}", self.scope(), message);
    }

    fn child(&self, bindings: &[(&str, &str)]) -> Box<dyn Logger> {
        let mut merged = self.bindings.clone();
        merged.extend(bindings.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())));
        Box::new(Self {
            bindings: merged,
            publisher: self.publisher.clone(),
        })
    }

    fn publish_event(&self, event: LoggerEvent) {
        match &event {
            LoggerEvent::Info { message } => tracing::info!(target: "integration.event", "{}{}", self.scope(), message),
            LoggerEvent::Named { name, description } => {
                tracing::info!(target: "integration.event", event = name.as_str(), "{}{}", self.scope(), description);
            }
            LoggerEvent::Error { error, error_code } => {
                tracing::error!(target: "integration.event", code = error_code, "{}{}", self.scope(), error);
            }
            LoggerEvent::Metric { name, value, unit } => {
                tracing::info!(target: "integration.metric", metric = name.as_str(), value, unit, "{}", self.scope());
            }
        }
        self.forward_to_publisher(&event);
    }
}

/// Runs `operation`, unconditionally publishing a `Milliseconds` metric
/// named `metric_name` through `logger` whether or not `operation`
/// succeeds, then returns the operation's result unchanged.
///
/// Resolves the open question on whether `timeOperation` should publish
/// its metric even on failure: it does, because a slow failing step is
/// exactly the case an operator most wants to see in timing data.
pub fn time_operation<T, E>(
    logger: &dyn Logger,
    metric_name: &str,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let start = Instant::now();
    let result = operation();
    #[allow(
        clippy::cast_precision_loss,
        reason = "step durations never approach f64's precision limit"
    )]
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    logger.publish_metric(metric_name, elapsed_ms, "Milliseconds");
    result
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingLogger {
        metrics: Arc<Mutex<Vec<(String, f64)>>>,
    }

    impl Logger for RecordingLogger {
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        fn error(&self, _message: &str) {}
        fn trace(&self, _message: &str) {}
        fn child(&self, _bindings: &[(&str, &str)]) -> Box<dyn Logger> {
            Box::new(Self {
                metrics: Arc::clone(&self.metrics),
            })
        }
        fn publish_event(&self, event: LoggerEvent) {
            if let LoggerEvent::Metric { name, value, .. } = event {
                self.metrics.lock().expect("lock not poisoned").push((name, value));
            }
        }
    }

    #[test]
    fn metric_publishes_even_when_operation_fails() {
        let logger = RecordingLogger::default();
        let result: Result<(), &str> = time_operation(&logger, "step.duration", || Err("boom"));
        assert!(result.is_err());
        let metrics = logger.metrics.lock().expect("lock not poisoned");
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].0, "step.duration");
    }

    #[test]
    fn metric_publishes_on_success() {
        let logger = RecordingLogger::default();
        let result: Result<u32, &str> = time_operation(&logger, "step.duration", || Ok(42));
        assert_eq!(result, Ok(42));
        assert_eq!(logger.metrics.lock().expect("lock not poisoned").len(), 1);
    }
}
