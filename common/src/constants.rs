//! Names and discriminants exposed by the instrumentation image
//!
//! Userspace refers to every variable, program and map by these names, so
//! they must stay in sync with the compiled object.

// ============================================================================
// Address Families (for RawEvent.af)
// ============================================================================

/// IPv4 (`AF_INET`)
pub const AF_INET: i32 = 2;

/// IPv6 (`AF_INET6`)
pub const AF_INET6: i32 = 10;

// ============================================================================
// Runtime Variables (read-only data, fixed at load time)
// ============================================================================

/// Minimum connect latency to report, microseconds (`u64`)
pub const VAR_MIN_LATENCY_US: &str = "targ_min_us";

/// Only report connects made by this thread group (`u32`)
pub const VAR_TARGET_TGID: &str = "targ_tgid";

// ============================================================================
// Programs and the kernel functions they hook
// ============================================================================

/// fentry program for the IPv4 connect path
pub const PROG_TCP_V4_CONNECT: &str = "fentry_tcp_v4_connect";

/// fentry program for the IPv6 connect path
pub const PROG_TCP_V6_CONNECT: &str = "fentry_tcp_v6_connect";

/// fentry program for TCP state processing (SYN-SENT -> ESTABLISHED)
pub const PROG_TCP_RCV_STATE_PROCESS: &str = "fentry_tcp_rcv_state_process";

/// Kernel function hooked by [`PROG_TCP_V4_CONNECT`]
pub const FN_TCP_V4_CONNECT: &str = "tcp_v4_connect";

/// Kernel function hooked by [`PROG_TCP_V6_CONNECT`]
pub const FN_TCP_V6_CONNECT: &str = "tcp_v6_connect";

/// Kernel function hooked by [`PROG_TCP_RCV_STATE_PROCESS`]
pub const FN_TCP_RCV_STATE_PROCESS: &str = "tcp_rcv_state_process";

// ============================================================================
// Maps
// ============================================================================

/// Ring buffer carrying [`crate::RawEvent`] records to userspace
pub const MAP_EVENTS: &str = "events";
