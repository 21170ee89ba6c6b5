use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use super::{CsEvent, EventCategory, EventSeverity};

/// Event type wildcard: a listener declaring it receives every type.
pub const ALL_EVENT_TYPES: &str = "*";

/// Error raised by a listener while handling an event.
///
/// Contained by the dispatcher: it is counted and passed to
/// [`EventListener::handle_error`], never propagated to the publisher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ListenerError {
    #[error("{0}")]
    Failed(String),

    #[error("listener panicked: {0}")]
    Panicked(String),
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        ListenerError::Failed(message)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        ListenerError::Failed(message.to_string())
    }
}

/// Subscriber on the event bus.
///
/// Interest (types, categories, minimum severity, priority) is read once at
/// registration. Only [`is_enabled`](Self::is_enabled) is consulted on every
/// dispatch. `on_event` may be called concurrently from several dispatch
/// threads.
pub trait EventListener: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    /// Event types of interest; `"*"` means all.
    fn supported_event_types(&self) -> HashSet<String> {
        HashSet::from([ALL_EVENT_TYPES.to_string()])
    }

    /// Categories of interest; empty means all.
    fn supported_categories(&self) -> HashSet<EventCategory> {
        HashSet::new()
    }

    fn minimum_severity(&self) -> EventSeverity {
        EventSeverity::Trace
    }

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn initialize(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_event(&self, event: &CsEvent) -> Result<(), ListenerError>;

    /// Called with the error `on_event` returned (or the panic it raised).
    fn handle_error(&self, event: &CsEvent, error: &ListenerError) {
        warn!(
            listener = self.name(),
            event_type = event.event_type(),
            event_id = event.id(),
            error = %error,
            "listener failed to handle event"
        );
    }

    fn cleanup(&self) {}

    /// Whether this listener wants `event`, ignoring the enabled flag.
    fn accepts(&self, event: &CsEvent) -> bool {
        ListenerFilter::of(self).matches(event)
    }
}

/// Interest declared by a listener, captured once.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerFilter {
    event_types: Option<HashSet<String>>,
    categories: HashSet<EventCategory>,
    minimum_severity: EventSeverity,
}

impl ListenerFilter {
    pub fn of<L: EventListener + ?Sized>(listener: &L) -> Self {
        let types = listener.supported_event_types();
        let event_types = if types.contains(ALL_EVENT_TYPES) {
            None
        } else {
            Some(types)
        };
        Self {
            event_types,
            categories: listener.supported_categories(),
            minimum_severity: listener.minimum_severity(),
        }
    }

    pub fn matches(&self, event: &CsEvent) -> bool {
        if event.severity() < self.minimum_severity {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&event.category()) {
            return false;
        }
        match &self.event_types {
            Some(types) => types.contains(event.event_type()),
            None => true,
        }
    }
}

/// A listener together with its captured interest.
pub(crate) struct RegisteredListener {
    pub(crate) listener: Arc<dyn EventListener>,
    pub(crate) filter: ListenerFilter,
    pub(crate) priority: i32,
}

impl RegisteredListener {
    pub(crate) fn new(listener: Arc<dyn EventListener>) -> Self {
        let filter = ListenerFilter::of(listener.as_ref());
        let priority = listener.priority();
        Self {
            listener,
            filter,
            priority,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.listener.name()
    }

    pub(crate) fn wants(&self, event: &CsEvent) -> bool {
        self.listener.is_enabled() && self.filter.matches(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Picky;

    impl EventListener for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn supported_event_types(&self) -> HashSet<String> {
            HashSet::from(["TEST_FAILED".to_string()])
        }

        fn supported_categories(&self) -> HashSet<EventCategory> {
            HashSet::from([EventCategory::TestLifecycle])
        }

        fn minimum_severity(&self) -> EventSeverity {
            EventSeverity::Warn
        }

        fn on_event(&self, _event: &CsEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    struct Everything;

    impl EventListener for Everything {
        fn name(&self) -> &str {
            "everything"
        }

        fn on_event(&self, _event: &CsEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    #[test]
    fn test_filter_checks_type_category_and_severity() {
        let failed = CsEvent::new("TEST_FAILED", EventCategory::TestLifecycle, EventSeverity::Error);
        let passed = CsEvent::new("TEST_PASSED", EventCategory::TestLifecycle, EventSeverity::Error);
        let quiet = CsEvent::new("TEST_FAILED", EventCategory::TestLifecycle, EventSeverity::Info);
        let driver = CsEvent::new("TEST_FAILED", EventCategory::WebDriver, EventSeverity::Error);

        assert!(Picky.accepts(&failed));
        assert!(!Picky.accepts(&passed));
        assert!(!Picky.accepts(&quiet));
        assert!(!Picky.accepts(&driver));
    }

    #[test]
    fn test_default_error_handler_logs_and_returns() {
        crate::logging::init_logging("warn");
        let event = CsEvent::new("TEST_FAILED", EventCategory::TestLifecycle, EventSeverity::Error);
        Everything.handle_error(&event, &ListenerError::Failed("report server unreachable".to_string()));
        Everything.handle_error(&event, &ListenerError::Panicked("index out of bounds".to_string()));
    }

    #[test]
    fn test_defaults_accept_everything() {
        for category in EventCategory::ALL {
            let event = CsEvent::new("ANY", category, EventSeverity::Trace);
            assert!(Everything.accepts(&event));
        }
    }

    #[test]
    fn test_error_conversions() {
        let err: ListenerError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        let err = ListenerError::Panicked("oops".to_string());
        assert_eq!(err.to_string(), "listener panicked: oops");
    }
}
