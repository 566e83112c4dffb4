//! Event sink abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventSink`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::ServerEvent;

/// Trait for emitting events to every connected listener without knowledge
/// of transport.
///
/// The pre-fetch pipeline and playback controller use this trait to fan out
/// events, decoupling them from how events reach clients (WebSocket today).
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     sink: Arc<dyn EventSink>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.sink.broadcast(ServerEvent::QueueUpdated);
///     }
/// }
/// ```
pub trait EventSink: Send + Sync {
    /// Fans an event out to every live listener connection.
    fn broadcast(&self, event: ServerEvent);
}

/// No-op sink for tests that don't assert on events.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn broadcast(&self, _event: ServerEvent) {
        // No-op
    }
}

/// Logging sink for debugging and development.
///
/// Logs all events at debug level. Useful for tracing event flow without a
/// connected client.
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn broadcast(&self, event: ServerEvent) {
        tracing::debug!(?event, "server_event");
    }
}
