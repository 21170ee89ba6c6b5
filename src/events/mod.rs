//! Event bus.
//!
//! Producers build a [`CsEvent`] and hand it to [`EventManager::fire_event`].
//! Consumers implement [`EventListener`] and register with the manager. The
//! built-in [`LoggingEventListener`], [`MetricsEventListener`] and
//! [`ReportingEventListener`] cover the usual observers.

mod event;
mod listener;
mod listeners;
mod manager;
mod metrics;

pub use event::{types, CsEvent, EventCategory, EventSeverity};
pub use listener::{EventListener, ListenerError, ListenerFilter, ALL_EVENT_TYPES};
pub use listeners::{
    LoggingEventListener, MetricsEventListener, ReportingEventListener, TestMetricsSnapshot,
};
pub use manager::{EventError, EventManager, ManagerState};
pub use metrics::{EventMetrics, EventMetricsSnapshot};
