//! Metrics and observability for sluice.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and `/metrics` route

pub mod events;
pub mod server;

pub use server::{install, router, spawn_exporter};

/// Emit an internal event.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding Prometheus metric.
///
/// ```ignore
/// use sluice::metrics::events::{RowOutcome, RowProcessed};
///
/// emit!(RowProcessed { outcome: RowOutcome::Skipped });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
