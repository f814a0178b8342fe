//! Progress events and the sink boundary to the external observer.
//!
//! The pipeline emits immutable event values through an [`EventSink`]; the
//! GUI (or a test harness) drains them. Sinks are passive subscribers and
//! must never block the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, Level};

/// Per-target progress status reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// The target was picked up by a worker.
    Started,
    /// The target produced a dataset record.
    Succeeded,
    /// The target was skipped (invalid required field, cancellation).
    Skipped,
    /// The target failed after any retries.
    Failed,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A progress event for one target transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The target this event concerns.
    pub target_id: String,
    /// The transition.
    pub status: TargetStatus,
    /// Human-readable detail (URL, skip reason, or error).
    pub message: String,
    /// Targets processed so far.
    pub processed_count: usize,
    /// Total targets in the job.
    pub total_count: usize,
}

impl ProgressEvent {
    /// Event type string used when emitting through a sink.
    pub const EVENT_TYPE: &'static str = "target.progress";

    /// Creates a new progress event.
    #[must_use]
    pub fn new(
        target_id: impl Into<String>,
        status: TargetStatus,
        message: impl Into<String>,
        processed_count: usize,
        total_count: usize,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            status,
            message: message.into(),
            processed_count,
            total_count,
        }
    }

    /// The JSON payload emitted through a sink.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "target_id": self.target_id,
            "status": self.status.to_string(),
            "message": self.message,
            "processed_count": self.processed_count,
            "total_count": self.total_count,
        })
    }
}

/// Trait for event sinks that receive pipeline events.
///
/// Besides per-target progress, job lifecycle (`job.started`,
/// `job.finished`) and fetch attempts (`fetch.attempt`) flow through the
/// same sink.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Tries to emit an event without blocking.
    ///
    /// This method must never fail; errors are logged and suppressed.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits a per-target progress event.
    async fn emit_progress(&self, event: &ProgressEvent) {
        self.emit(ProgressEvent::EVENT_TYPE, Some(event.to_value()))
            .await;
    }
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no observer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events through the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: &Option<serde_json::Value>) {
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event_type,
                event_data = ?data,
                "Event: {}", event_type
            );
        } else {
            info!(
                event_type = %event_type,
                event_data = ?data,
                "Event: {}", event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, &data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, &data);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

/// A queue-draining sink for GUI integration.
///
/// Events are pushed onto an unbounded channel; the subscriber drains the
/// receiver at its own pace. A dropped receiver discards events silently.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::UnboundedSender<(String, Option<serde_json::Value>)>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver that drains it.
    #[must_use]
    pub fn channel() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<(String, Option<serde_json::Value>)>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, event_type: &str, data: Option<serde_json::Value>) {
        if self.tx.send((event_type.to_string(), data)).is_err() {
            debug!(event_type = %event_type, "event receiver dropped, discarding event");
        }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(event_type, data);
    }
}
