//! In-memory instrumentation image for tests
//!
//! Implements the image capabilities without touching the kernel. Every
//! variable write, finalize, attach and detach is appended to a shared
//! [`Journal`]; records are fed into the output channel through a
//! [`MemoryFeed`].

use crate::{
    error::{BackendError, ChannelError, LoadError},
    exporter::EventSink,
    image::{ChannelCloser, EventChannel, ImageSpec, LoadedImage, ProbeImage, ProbePoint, VariableValue},
    types::Event,
};
use bytes::Bytes;
use std::{
    io,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;

/// Shared, ordered log of image operations
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct MemoryImageSpec {
    image: MemoryImage,
    channel: MemoryChannel,
    journal: Journal,
    fail_finalize: bool,
}

impl MemoryImageSpec {
    pub fn new() -> (Self, MemoryFeed, Journal) {
        let (image, journal) = MemoryImage::new();
        let (channel, feed) = MemoryChannel::new();
        let spec = Self {
            image,
            channel,
            journal: journal.clone(),
            fail_finalize: false,
        };
        (spec, feed, journal)
    }

    pub fn fail_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    pub fn fail_attach(mut self, function: &'static str) -> Self {
        self.image = self.image.fail_attach(function);
        self
    }
}

impl ImageSpec for MemoryImageSpec {
    type Image = MemoryImage;

    fn set_variable(&mut self, name: &str, value: VariableValue) -> Result<(), LoadError> {
        let shown = match value {
            VariableValue::U32(v) => v.to_string(),
            VariableValue::U64(v) => v.to_string(),
        };
        self.journal.push(format!("set {name}={shown}"));
        Ok(())
    }

    fn finalize(self) -> Result<LoadedImage<MemoryImage>, LoadError> {
        if self.fail_finalize {
            return Err(LoadError::Image("verifier rejected program".into()));
        }
        self.journal.push("finalize".to_string());
        Ok(LoadedImage {
            image: self.image,
            events: self.channel,
        })
    }
}

pub struct MemoryLink {
    function: &'static str,
}

pub struct MemoryImage {
    journal: Journal,
    fail_attach: Option<&'static str>,
    fail_detach: Option<&'static str>,
}

impl MemoryImage {
    pub fn new() -> (Self, Journal) {
        let journal = Journal::default();
        let image = Self {
            journal: journal.clone(),
            fail_attach: None,
            fail_detach: None,
        };
        (image, journal)
    }

    pub fn fail_attach(mut self, function: &'static str) -> Self {
        self.fail_attach = Some(function);
        self
    }

    pub fn fail_detach(mut self, function: &'static str) -> Self {
        self.fail_detach = Some(function);
        self
    }
}

impl ProbeImage for MemoryImage {
    type Link = MemoryLink;
    type Channel = MemoryChannel;

    fn attach(&mut self, point: &ProbePoint) -> Result<MemoryLink, BackendError> {
        if self.fail_attach == Some(point.function) {
            return Err(format!("no BTF id for {}", point.function).into());
        }
        self.journal.push(format!("attach {}", point.function));
        Ok(MemoryLink {
            function: point.function,
        })
    }

    fn detach(&mut self, link: MemoryLink) -> Result<(), BackendError> {
        if self.fail_detach == Some(link.function) {
            return Err("link already gone".into());
        }
        self.journal.push(format!("detach {}", link.function));
        Ok(())
    }
}

type FeedItem = Result<Bytes, io::Error>;

/// Producer side of a [`MemoryChannel`]
#[derive(Clone)]
pub struct MemoryFeed(mpsc::UnboundedSender<FeedItem>);

impl MemoryFeed {
    pub fn push(&self, record: impl Into<Bytes>) {
        let _ = self.0.send(Ok(record.into()));
    }

    /// Make the next read fail with `kind`
    pub fn fail(&self, kind: io::ErrorKind) {
        let _ = self.0.send(Err(io::Error::from(kind)));
    }
}

/// Output channel backed by an unbounded queue
///
/// Reads block until a record is fed or the channel is closed.
pub struct MemoryChannel {
    rx: mpsc::UnboundedReceiver<FeedItem>,
    closer: ChannelCloser,
}

impl MemoryChannel {
    pub fn new() -> (Self, MemoryFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            rx,
            closer: ChannelCloser::new(),
        };
        (channel, MemoryFeed(tx))
    }
}

impl EventChannel for MemoryChannel {
    fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    async fn read_record(&mut self) -> Result<Bytes, ChannelError> {
        if self.closer.is_closed() {
            return Err(ChannelError::Closed);
        }
        tokio::select! {
            biased;
            () = self.closer.closed() => Err(ChannelError::Closed),
            item = self.rx.recv() => match item {
                Some(Ok(record)) => Ok(record),
                Some(Err(e)) => Err(ChannelError::Io(e)),
                None => {
                    self.closer.closed().await;
                    Err(ChannelError::Closed)
                }
            },
        }
    }
}

/// What a [`ForwardingSink`] observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sunk {
    Header,
    Event(Event),
}

/// Sink that forwards everything to a test-owned receiver
pub struct ForwardingSink {
    tx: mpsc::UnboundedSender<Sunk>,
    failing_emits: usize,
}

impl ForwardingSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Sunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx,
            failing_emits: 0,
        };
        (sink, rx)
    }

    /// Make the next `count` emits fail without forwarding
    pub fn fail_emits(mut self, count: usize) -> Self {
        self.failing_emits = count;
        self
    }
}

impl EventSink for ForwardingSink {
    fn header(&mut self) -> anyhow::Result<()> {
        self.tx.send(Sunk::Header)?;
        Ok(())
    }

    fn emit(&mut self, event: &Event) -> anyhow::Result<()> {
        if self.failing_emits > 0 {
            self.failing_emits -= 1;
            anyhow::bail!("broken pipe");
        }
        self.tx.send(Sunk::Event(event.clone()))?;
        Ok(())
    }
}
