//! Event stream consumer
//!
//! A single task reads raw records from the output channel, decodes them and
//! forwards each event to the sink in read order. Only cancellation (or a
//! closed channel) ends the task; read and decode failures are logged and
//! skipped.

use crate::{
    codec,
    collector::StreamStats,
    error::ChannelError,
    exporter::EventSink,
    image::EventChannel,
};
use log::{debug, trace, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Backoff between consecutive failed reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry straight away after every failure
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay before retrying after `consecutive_failures` failed reads in a row
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let shift = (consecutive_failures - 1).min(31);
        self.initial.saturating_mul(1u32 << shift).min(self.max)
    }
}

/// Consumer side of the output channel
#[derive(Clone)]
pub struct EventStream {
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl EventStream {
    pub fn new(cancel: CancellationToken, retry: RetryPolicy) -> Self {
        Self { cancel, retry }
    }

    /// Run [`consume`](Self::consume) on its own task
    pub fn spawn<C, S>(&self, channel: C, sink: S) -> JoinHandle<StreamStats>
    where
        C: EventChannel,
        S: EventSink,
    {
        let stream = self.clone();
        tokio::spawn(async move { stream.consume(channel, sink).await })
    }

    /// Forward every decodable record to `sink` until cancelled
    pub async fn consume<C, S>(&self, mut channel: C, mut sink: S) -> StreamStats
    where
        C: EventChannel,
        S: EventSink,
    {
        let mut stats = StreamStats::new();
        let mut consecutive_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = channel.read_record() => result,
            };

            let record = match result {
                Ok(record) => record,
                Err(_) if self.cancel.is_cancelled() => break,
                Err(ChannelError::Closed) => {
                    warn!("Output channel closed while still running, stopping consumer");
                    break;
                }
                Err(ChannelError::Io(e)) => {
                    stats.record_read_failure();
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = self.retry.delay_for(consecutive_failures);
                    warn!(
                        "Failed to read from output channel: {} (retrying in {:?})",
                        e, delay
                    );
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            if self.cancel.is_cancelled() {
                break;
            }

            match codec::decode(&record) {
                Ok(event) => {
                    trace!("Event: {:?}", event);
                    match sink.emit(&event) {
                        Ok(()) => stats.record_event(&event),
                        Err(e) => {
                            warn!("Failed to write event: {:#}", e);
                            stats.record_sink_failure();
                        }
                    }
                }
                Err(e) => {
                    warn!("Dropping malformed record ({}): {:02x?}", e, &record[..]);
                    stats.record_decode_failure();
                }
            }
        }

        debug!("Event consumer stopped: {}", stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{ForwardingSink, MemoryChannel, Sunk},
        types::{kernel::RawEvent, kernel::constants::AF_INET},
    };
    use bytes::Bytes;
    use std::io;

    fn record(tgid: u32, delta_us: u64) -> Bytes {
        let mut comm = [0u8; 16];
        comm[..4].copy_from_slice(b"curl");
        codec::encode(&RawEvent {
            saddr: [10, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            daddr: [10, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            comm,
            delta_us,
            ts_us: 1,
            tgid,
            af: AF_INET,
            lport: 40000,
            dport: 80,
        })
    }

    fn pids(sunk: &[Sunk]) -> Vec<u32> {
        sunk.iter()
            .filter_map(|s| match s {
                Sunk::Event(e) => Some(e.tgid),
                Sunk::Header => None,
            })
            .collect()
    }

    #[test]
    fn test_retry_policy_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(4), Duration::from_millis(80));
        assert_eq!(policy.delay_for(8), Duration::from_secs(1));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(1));
        assert_eq!(RetryPolicy::immediate().delay_for(5), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_malformed_record_between_valid_ones() {
        let (channel, feed) = MemoryChannel::new();
        let (sink, mut rx) = ForwardingSink::new();
        let cancel = CancellationToken::new();
        let stream = EventStream::new(cancel.clone(), RetryPolicy::immediate());
        let handle = stream.spawn(channel, sink);

        feed.push(record(1, 100));
        feed.push(record(2, 100).slice(..10));
        feed.push(record(3, 100));

        let mut sunk = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        cancel.cancel();
        let stats = handle.await.unwrap();

        while let Ok(extra) = rx.try_recv() {
            sunk.push(extra);
        }
        assert_eq!(pids(&sunk), vec![1, 3]);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.decode_failures, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_blocked_in_read() {
        let (channel, _feed) = MemoryChannel::new();
        let closer = channel.closer();
        let (sink, mut rx) = ForwardingSink::new();
        let cancel = CancellationToken::new();
        let handle = EventStream::new(cancel.clone(), RetryPolicy::default()).spawn(channel, sink);

        tokio::task::yield_now().await;
        cancel.cancel();
        closer.close();

        let stats = handle.await.unwrap();
        assert_eq!(stats, StreamStats::new());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closing_channel_unblocks_reader() {
        let (channel, _feed) = MemoryChannel::new();
        let closer = channel.closer();
        let (sink, _rx) = ForwardingSink::new();
        let cancel = CancellationToken::new();
        let handle = EventStream::new(cancel.clone(), RetryPolicy::default()).spawn(channel, sink);

        tokio::task::yield_now().await;
        closer.close();

        let stats = handle.await.unwrap();
        assert_eq!(stats.read_failures, 0);
    }

    #[tokio::test]
    async fn test_no_events_after_cancel() {
        let (channel, feed) = MemoryChannel::new();
        let (sink, mut rx) = ForwardingSink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        feed.push(record(1, 100));

        let stats = EventStream::new(cancel, RetryPolicy::immediate())
            .consume(channel, sink)
            .await;

        assert_eq!(stats.forwarded, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_transient_read_error_continues() {
        let (channel, feed) = MemoryChannel::new();
        let (sink, mut rx) = ForwardingSink::new();
        let cancel = CancellationToken::new();
        let handle = EventStream::new(cancel.clone(), RetryPolicy::immediate()).spawn(channel, sink);

        feed.fail(io::ErrorKind::Interrupted);
        feed.fail(io::ErrorKind::Other);
        feed.push(record(7, 2500));

        let sunk = rx.recv().await.unwrap();
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(pids(&[sunk]), vec![7]);
        assert_eq!(stats.read_failures, 2);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.max_latency_us(), Some(2500));
    }

    #[tokio::test]
    async fn test_cancel_during_retry_backoff() {
        let (channel, feed) = MemoryChannel::new();
        let (sink, _rx) = ForwardingSink::new();
        let cancel = CancellationToken::new();
        let retry = RetryPolicy {
            initial: Duration::from_secs(3600),
            max: Duration::from_secs(3600),
        };
        let handle = EventStream::new(cancel.clone(), retry).spawn(channel, sink);

        feed.fail(io::ErrorKind::Other);
        // Let the consumer hit the failure and start sleeping
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("consumer still sleeping after cancel")
            .unwrap();
        assert_eq!(stats.read_failures, 1);
        assert_eq!(stats.forwarded, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_stream() {
        let (channel, feed) = MemoryChannel::new();
        let (sink, mut rx) = ForwardingSink::new();
        let sink = sink.fail_emits(1);
        let cancel = CancellationToken::new();
        let handle = EventStream::new(cancel.clone(), RetryPolicy::immediate()).spawn(channel, sink);

        feed.push(record(1, 100));
        feed.push(record(2, 300));

        let sunk = rx.recv().await.unwrap();
        cancel.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(pids(&[sunk]), vec![2]);
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.min_latency_us(), Some(300));
    }
}
