//! TCP connect latency tracer
//!
//! Loads the tcpconnlat instrumentation image, attaches its fentry programs
//! and streams one event per completed TCP connect to a sink.

pub mod attach;
pub mod codec;
pub mod collector;
pub mod error;
pub mod events;
pub mod exporter;
pub mod image;
pub mod limits;
pub mod lifecycle;
pub mod loader;
pub mod types;

#[cfg(test)]
mod testing;

pub use collector::StreamStats;
pub use error::LifecycleError;
pub use events::{EventStream, RetryPolicy};
pub use exporter::{EventSink, JsonSink, OutputFormat, TableSink};
pub use lifecycle::{Lifecycle, Phase};
pub use loader::AyaImageSpec;
pub use types::*;
