//! Userspace type definitions
//!
//! ## Organization
//!
//! - **Kernel Types**: the raw wire record and constants (from tcpconnlat_common)
//! - **Userspace Types**: decoded events, probe configuration and display rows

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

// ============================================================================
// Kernel Types (from the instrumentation image)
// ============================================================================

pub mod kernel {
    //! Types shared with the instrumentation image
    //!
    //! Re-exported from the tcpconnlat-common crate; they must maintain
    //! binary compatibility with the compiled object.

    pub use tcpconnlat_common::constants;
    pub use tcpconnlat_common::types::{RawEvent, EVENT_WIRE_SIZE, TASK_COMM_LEN};
}

pub use kernel::{RawEvent, EVENT_WIRE_SIZE, TASK_COMM_LEN};

/// Source and destination addresses of a connection, resolved once from the
/// record's address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addresses {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
    /// Family the decoder does not recognise; the raw bytes are not interpreted.
    Unknown { family: i32 },
}

impl Addresses {
    /// Two character IP version tag used in the table's IP column
    pub fn version_tag(&self) -> &'static str {
        match self {
            Addresses::V4 { .. } => "v4",
            Addresses::V6 { .. } => "v6",
            Addresses::Unknown { .. } => "??",
        }
    }

    /// Printable (source, destination) pair; `-` for an unknown family
    pub fn to_strings(&self) -> (String, String) {
        match self {
            Addresses::V4 { src, dst } => (src.to_string(), dst.to_string()),
            Addresses::V6 { src, dst } => (src.to_string(), dst.to_string()),
            Addresses::Unknown { .. } => ("-".to_string(), "-".to_string()),
        }
    }
}

/// A decoded connection latency sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub addresses: Addresses,
    /// Command name as emitted by the kernel, NUL padded
    pub comm: [u8; TASK_COMM_LEN],
    /// Connect latency in microseconds
    pub latency_us: u64,
    /// Kernel monotonic timestamp in microseconds (not wall-clock)
    pub timestamp_us: u64,
    /// Thread group id of the connecting process
    pub tgid: u32,
    pub lport: u16,
    pub dport: u16,
}

impl Event {
    /// Command name with trailing NUL padding removed
    pub fn comm(&self) -> String {
        String::from_utf8_lossy(&self.comm)
            .trim_end_matches('\0')
            .to_string()
    }

    /// Latency in milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.latency_us as f64 / 1000.0
    }
}

/// Filters handed to the instrumentation image at load time
///
/// Only values greater than zero are applied; `None` and `Some(0)` both
/// mean "no filtering".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Minimum connect latency to report (microseconds)
    pub min_latency_us: Option<u64>,
    /// Only report connects from this process group
    pub target_tgid: Option<u32>,
}

impl ProbeConfig {
    /// Threshold to write into the image, if filtering is requested
    pub fn effective_min_latency_us(&self) -> Option<u64> {
        self.min_latency_us.filter(|&us| us > 0)
    }

    /// Process group to write into the image, if filtering is requested
    pub fn effective_target_tgid(&self) -> Option<u32> {
        self.target_tgid.filter(|&tgid| tgid > 0)
    }
}

/// One rendered table row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    /// Wall-clock time of rendering, `HH:MM:SS`
    pub time: String,
    pub pid: u32,
    pub comm: String,
    pub ip: &'static str,
    pub saddr: String,
    pub lport: u16,
    pub daddr: String,
    pub dport: u16,
    /// Latency in milliseconds with three decimals
    pub latency_ms: String,
}

impl DisplayRow {
    /// Column header matching the row layout
    pub fn header() -> String {
        format!(
            "{:<10} {:<6} {:<12} {:<2} {:<16} {:<6} {:<16} {:<5} {}",
            "TIME", "PID", "COMM", "IP", "SADDR", "LPORT", "DADDR", "DPORT", "LAT(ms)"
        )
    }
}

impl fmt::Display for DisplayRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:<6} {:<12} {:<2} {:<16} {:<6} {:<16} {:<5} {}",
            self.time,
            self.pid,
            self.comm,
            self.ip,
            self.saddr,
            self.lport,
            self.daddr,
            self.dport,
            self.latency_ms
        )
    }
}
