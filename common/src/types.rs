//! Event record emitted by the instrumentation image
//!
//! Mirrors `struct event` of the kernel-side program. The record is written
//! to the ring buffer in native (little-endian) byte order.

/// Length of the task command name (`TASK_COMM_LEN`)
pub const TASK_COMM_LEN: usize = 16;

/// Number of meaningful bytes in one record.
///
/// The C struct is padded to an 8-byte boundary, so records read from the
/// ring buffer are usually [`core::mem::size_of::<RawEvent>()`] bytes long.
/// Only the first `EVENT_WIRE_SIZE` bytes carry fields; anything beyond is
/// trailing padding.
pub const EVENT_WIRE_SIZE: usize = 16 + 16 + TASK_COMM_LEN + 8 + 8 + 4 + 4 + 2 + 2;

/// Connection latency sample (one per completed connect)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Source address: `saddr_v4` in the first 4 bytes, or `saddr_v6`
    pub saddr: [u8; 16],
    /// Destination address: `daddr_v4` in the first 4 bytes, or `daddr_v6`
    pub daddr: [u8; 16],
    /// Command name of the connecting task, NUL padded
    pub comm: [u8; TASK_COMM_LEN],
    /// Time from connect() to the SYN-ACK being processed (microseconds)
    pub delta_us: u64,
    /// Kernel monotonic timestamp (microseconds)
    pub ts_us: u64,
    /// Thread group id of the connecting task
    pub tgid: u32,
    /// Address family (`AF_INET` or `AF_INET6`)
    pub af: i32,
    /// Local port
    pub lport: u16,
    /// Destination port
    pub dport: u16,
}

// Compile-time layout checks against the kernel struct
const _: () = {
    assert!(core::mem::offset_of!(RawEvent, saddr) == 0);
    assert!(core::mem::offset_of!(RawEvent, daddr) == 16);
    assert!(core::mem::offset_of!(RawEvent, comm) == 32);
    assert!(core::mem::offset_of!(RawEvent, delta_us) == 48);
    assert!(core::mem::offset_of!(RawEvent, ts_us) == 56);
    assert!(core::mem::offset_of!(RawEvent, tgid) == 64);
    assert!(core::mem::offset_of!(RawEvent, af) == 68);
    assert!(core::mem::offset_of!(RawEvent, lport) == 72);
    assert!(core::mem::offset_of!(RawEvent, dport) == 74);
    assert!(core::mem::offset_of!(RawEvent, dport) + 2 == EVENT_WIRE_SIZE);
    assert!(core::mem::size_of::<RawEvent>() == 80);
};
