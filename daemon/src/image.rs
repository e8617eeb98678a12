//! Instrumentation image capabilities
//!
//! The compiled kernel program is treated as an opaque object. Userspace only
//! needs four things from it: set a runtime variable before loading, finalize
//! it into kernel-resident programs and maps, attach/detach programs, and
//! read records from its output channel. The split between [`ImageSpec`] and
//! [`ProbeImage`] means variables cannot be set once the image is loaded.

use crate::error::{BackendError, ChannelError, LoadError};
use bytes::Bytes;
use std::future::Future;
use tcpconnlat_common::constants::*;
use tokio_util::sync::CancellationToken;

/// Value for a runtime variable of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableValue {
    U32(u32),
    U64(u64),
}

/// A program in the image and the kernel function it hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePoint {
    pub program: &'static str,
    pub function: &'static str,
}

/// Programs attached by tcpconnlat, in attach order
pub const TCP_CONNECT_PROBES: [ProbePoint; 3] = [
    ProbePoint {
        program: PROG_TCP_V4_CONNECT,
        function: FN_TCP_V4_CONNECT,
    },
    ProbePoint {
        program: PROG_TCP_V6_CONNECT,
        function: FN_TCP_V6_CONNECT,
    },
    ProbePoint {
        program: PROG_TCP_RCV_STATE_PROCESS,
        function: FN_TCP_RCV_STATE_PROCESS,
    },
];

/// An image that has been parsed but not yet loaded into the kernel
pub trait ImageSpec {
    type Image: ProbeImage;

    /// Set a named runtime variable. Unknown names and mismatched types are
    /// errors.
    fn set_variable(&mut self, name: &str, value: VariableValue) -> Result<(), LoadError>;

    /// Load the image's maps and programs into the kernel and open its
    /// output channel. Nothing is attached yet.
    fn finalize(self) -> Result<LoadedImage<Self::Image>, LoadError>;
}

/// An image resident in the kernel
pub trait ProbeImage {
    /// Handle for one live attachment
    type Link;
    type Channel: EventChannel;

    fn attach(&mut self, point: &ProbePoint) -> Result<Self::Link, BackendError>;

    fn detach(&mut self, link: Self::Link) -> Result<(), BackendError>;
}

/// Result of loading: the resident image plus its output channel
pub struct LoadedImage<I: ProbeImage> {
    pub image: I,
    pub events: I::Channel,
}

/// Multi-producer, single-consumer stream of raw records
pub trait EventChannel: Send + 'static {
    /// Handle the owner uses to close this channel
    fn closer(&self) -> ChannelCloser;

    /// Wait for the next record.
    ///
    /// Once the channel is closed, pending and future reads fail with
    /// [`ChannelError::Closed`].
    fn read_record(&mut self) -> impl Future<Output = Result<Bytes, ChannelError>> + Send;
}

/// Close side of an [`EventChannel`]
#[derive(Debug, Clone, Default)]
pub struct ChannelCloser {
    closed: CancellationToken,
}

impl ChannelCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the channel, waking any blocked reader. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the channel is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_table_order() {
        let functions: Vec<_> = TCP_CONNECT_PROBES.iter().map(|p| p.function).collect();
        assert_eq!(
            functions,
            ["tcp_v4_connect", "tcp_v6_connect", "tcp_rcv_state_process"]
        );
    }

    #[tokio::test]
    async fn test_closer_wakes_waiters() {
        let closer = ChannelCloser::new();
        let waiter = {
            let closer = closer.clone();
            tokio::spawn(async move { closer.closed().await })
        };

        assert!(!closer.is_closed());
        closer.close();
        closer.close();
        waiter.await.unwrap();
        assert!(closer.is_closed());
    }
}
