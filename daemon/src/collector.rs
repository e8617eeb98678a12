//! Per-run stream statistics
//!
//! Counts what the consumer did with each record it read. Reported once, in
//! the shutdown status line.

use crate::types::Event;
use std::fmt;

/// Counters for one consumer run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    /// Events the sink wrote successfully
    pub forwarded: u64,
    /// Records dropped because they did not decode
    pub decode_failures: u64,
    /// Non-cancellation read failures
    pub read_failures: u64,
    /// Events the sink failed to write
    pub sink_failures: u64,
    min_latency_us: Option<u64>,
    max_latency_us: u64,
    total_latency_us: u128,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for an event the sink wrote
    pub fn record_event(&mut self, event: &Event) {
        self.forwarded += 1;
        self.total_latency_us += u128::from(event.latency_us);
        self.max_latency_us = self.max_latency_us.max(event.latency_us);
        self.min_latency_us = Some(
            self.min_latency_us
                .map_or(event.latency_us, |min| min.min(event.latency_us)),
        );
    }

    pub fn record_decode_failure(&mut self) {
        self.decode_failures += 1;
    }

    pub fn record_read_failure(&mut self) {
        self.read_failures += 1;
    }

    pub fn record_sink_failure(&mut self) {
        self.sink_failures += 1;
    }

    pub fn min_latency_us(&self) -> Option<u64> {
        self.min_latency_us
    }

    pub fn max_latency_us(&self) -> Option<u64> {
        self.min_latency_us.map(|_| self.max_latency_us)
    }

    /// Mean latency of forwarded events
    pub fn avg_latency_us(&self) -> Option<f64> {
        if self.forwarded == 0 {
            return None;
        }
        Some(self.total_latency_us as f64 / self.forwarded as f64)
    }
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} events, {} decode failures, {} read failures",
            self.forwarded, self.decode_failures, self.read_failures
        )?;
        if self.sink_failures > 0 {
            write!(f, ", {} sink failures", self.sink_failures)?;
        }
        if let (Some(min), Some(max), Some(avg)) = (
            self.min_latency_us(),
            self.max_latency_us(),
            self.avg_latency_us(),
        ) {
            write!(
                f,
                " (latency ms min {:.3} avg {:.3} max {:.3})",
                min as f64 / 1000.0,
                avg / 1000.0,
                max as f64 / 1000.0
            )?;
        }
        Ok(())
    }
}
