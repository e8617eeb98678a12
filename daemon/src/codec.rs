//! Event record codec
//!
//! Decodes the fixed-layout little-endian records written by the
//! instrumentation image and renders them into table rows.

use crate::{
    error::DecodeError,
    types::{kernel::constants::{AF_INET, AF_INET6}, Addresses, DisplayRow, Event, RawEvent, EVENT_WIRE_SIZE},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{Local, NaiveTime};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Decode one record
///
/// Records shorter than [`EVENT_WIRE_SIZE`] are rejected; trailing bytes
/// beyond it (struct padding) are ignored.
pub fn decode(bytes: &[u8]) -> Result<Event, DecodeError> {
    if bytes.len() < EVENT_WIRE_SIZE {
        return Err(DecodeError::TooShort {
            expected: EVENT_WIRE_SIZE,
            actual: bytes.len(),
        });
    }

    let mut buf = &bytes[..EVENT_WIRE_SIZE];
    let mut raw = RawEvent::default();
    buf.copy_to_slice(&mut raw.saddr);
    buf.copy_to_slice(&mut raw.daddr);
    buf.copy_to_slice(&mut raw.comm);
    raw.delta_us = buf.get_u64_le();
    raw.ts_us = buf.get_u64_le();
    raw.tgid = buf.get_u32_le();
    raw.af = buf.get_i32_le();
    raw.lport = buf.get_u16_le();
    raw.dport = buf.get_u16_le();

    Ok(Event::from(raw))
}

/// Encode a record the way the kernel writes it, including the struct's
/// trailing padding
pub fn encode(raw: &RawEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(std::mem::size_of::<RawEvent>());
    buf.put_slice(&raw.saddr);
    buf.put_slice(&raw.daddr);
    buf.put_slice(&raw.comm);
    buf.put_u64_le(raw.delta_us);
    buf.put_u64_le(raw.ts_us);
    buf.put_u32_le(raw.tgid);
    buf.put_i32_le(raw.af);
    buf.put_u16_le(raw.lport);
    buf.put_u16_le(raw.dport);
    buf.put_bytes(0, std::mem::size_of::<RawEvent>() - EVENT_WIRE_SIZE);
    buf.freeze()
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        let addresses = match raw.af {
            AF_INET => Addresses::V4 {
                src: ipv4_prefix(&raw.saddr),
                dst: ipv4_prefix(&raw.daddr),
            },
            AF_INET6 => Addresses::V6 {
                src: Ipv6Addr::from(raw.saddr),
                dst: Ipv6Addr::from(raw.daddr),
            },
            family => Addresses::Unknown { family },
        };

        Event {
            addresses,
            comm: raw.comm,
            latency_us: raw.delta_us,
            timestamp_us: raw.ts_us,
            tgid: raw.tgid,
            lport: raw.lport,
            dport: raw.dport,
        }
    }
}

// The IPv4 member of the address union occupies the first four bytes.
fn ipv4_prefix(raw: &[u8; 16]) -> Ipv4Addr {
    Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])
}

/// Render an event stamped with the current wall-clock time
pub fn render(event: &Event) -> DisplayRow {
    render_at(event, Local::now().time())
}

/// Render an event stamped with `now`
pub fn render_at(event: &Event, now: NaiveTime) -> DisplayRow {
    let (saddr, daddr) = event.addresses.to_strings();

    DisplayRow {
        time: now.format("%H:%M:%S").to_string(),
        pid: event.tgid,
        comm: event.comm(),
        ip: event.addresses.version_tag(),
        saddr,
        lport: event.lport,
        daddr,
        dport: event.dport,
        latency_ms: format!("{:.3}", event.latency_ms()),
    }
}
