//! Probe lifecycle
//!
//! Drives one tracing session from raised limits to a clean detach:
//!
//! ```text
//! Idle -> LimitsRaised -> Loaded -> Attached -> Running -> ShuttingDown -> Stopped
//! ```
//!
//! Any startup failure goes straight to `Stopped` with nothing left attached.
//! Shutdown is only ever triggered from outside, either by the shutdown
//! future passed to [`Lifecycle::run`] or by the cancellation token.

use crate::{
    attach::{attach_all, detach_all, AttachmentSet},
    collector::StreamStats,
    error::{LifecycleError, LimitError},
    events::{EventStream, RetryPolicy},
    exporter::EventSink,
    image::{EventChannel, ImageSpec, LoadedImage, TCP_CONNECT_PROBES},
    limits::MemlockLimit,
    loader,
    types::ProbeConfig,
};
use log::{debug, error, info, warn};
use std::future::Future;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LimitsRaised,
    Loaded,
    Attached,
    Running,
    ShuttingDown,
    Stopped,
}

/// Orchestrates a single tracing session
pub struct Lifecycle {
    phase: Phase,
    config: ProbeConfig,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub fn new(config: ProbeConfig, retry: RetryPolicy) -> Self {
        Self {
            phase: Phase::Idle,
            config,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Token that stops a running session when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Lifecycle {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Run the session until `shutdown` resolves or the token is cancelled
    ///
    /// Returns the consumer's statistics after every probe has been detached.
    /// A lifecycle runs at most once.
    pub async fn run<S, L, K, F>(
        &mut self,
        spec: S,
        raise_limits: L,
        sink: K,
        shutdown: F,
    ) -> Result<StreamStats, LifecycleError>
    where
        S: ImageSpec,
        L: FnOnce() -> Result<MemlockLimit, LimitError>,
        K: EventSink,
        F: Future<Output = ()>,
    {
        if self.phase != Phase::Idle {
            return Err(LifecycleError::AlreadyRan);
        }

        let result = self.drive(spec, raise_limits, sink, shutdown).await;
        if let Err(e) = &result {
            debug!("Startup aborted in {:?}: {}", self.phase, e);
        }
        self.enter(Phase::Stopped);
        result
    }

    async fn drive<S, L, K, F>(
        &mut self,
        spec: S,
        raise_limits: L,
        mut sink: K,
        shutdown: F,
    ) -> Result<StreamStats, LifecycleError>
    where
        S: ImageSpec,
        L: FnOnce() -> Result<MemlockLimit, LimitError>,
        K: EventSink,
        F: Future<Output = ()>,
    {
        let limit = raise_limits()?;
        debug!("Memlock limit: {:?}", limit);
        self.enter(Phase::LimitsRaised);

        let LoadedImage { mut image, events } = loader::load(spec, &self.config)?;
        self.enter(Phase::Loaded);

        // The image is dropped on error, releasing programs and maps
        let mut links = AttachmentSet::new();
        attach_all(&mut image, &TCP_CONNECT_PROBES, &mut links)?;
        self.enter(Phase::Attached);

        let closer = events.closer();
        if let Err(e) = sink.header() {
            warn!("Failed to write header: {:#}", e);
        }
        let consumer = EventStream::new(self.cancel.clone(), self.retry).spawn(events, sink);
        self.enter(Phase::Running);
        info!("Tracing TCP connect latency, press Ctrl-C to stop");

        let cancel = self.cancel.clone();
        tokio::select! {
            () = shutdown => {}
            () = cancel.cancelled() => {}
        }
        self.enter(Phase::ShuttingDown);

        cancel.cancel();
        closer.close();
        let stats = match consumer.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Event consumer task failed: {}", e);
                StreamStats::new()
            }
        };

        let hooked = links.len();
        detach_all(&mut image, &mut links);
        drop(image);

        info!("Detached {} probes, {}", hooked, stats);
        Ok(stats)
    }
}
