//! Shared types and constants for the tcpconnlat instrumentation image
//!
//! The instrumentation image is compiled separately; this crate records the
//! binary contract userspace relies on: the layout of the event record it
//! emits and the names of the variables, programs and maps it exposes.

#![no_std]

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::{RawEvent, EVENT_WIRE_SIZE};
