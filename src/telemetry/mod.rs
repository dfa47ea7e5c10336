//! Telemetry and progress reporting.
//!
//! [`Metrics`] counts what the workers do; the meter traits in [`progress`] are
//! the hooks progress bars plug into.

pub mod metrics;
pub mod progress;

pub use metrics::{Metrics, MetricsSnapshot};
pub use progress::{CompletionMeter, DepthMeter, NoopMeter};
