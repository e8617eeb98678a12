//! Instrumentation image loader
//!
//! Applies the probe configuration to an image and loads it into the kernel.
//! The aya backend reads a compiled object (from disk or embedded), loads its
//! fentry programs against the running kernel's BTF and opens the `events`
//! ring buffer. Nothing is attached here.

use crate::{
    error::{BackendError, ChannelError, LoadError},
    image::{
        ChannelCloser, EventChannel, ImageSpec, LoadedImage, ProbeImage, ProbePoint, VariableValue,
        TCP_CONNECT_PROBES,
    },
    types::{kernel::constants::*, ProbeConfig},
};
use aya::{
    maps::{MapData, RingBuf},
    programs::{fentry::FEntryLinkId, FEntry},
    Bpf, BpfLoader, Btf,
};
use bytes::Bytes;
use log::{debug, info};
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};
use tokio::io::unix::AsyncFd;

/// Apply `config` to `spec` and load it
///
/// Only filters greater than zero are written into the image; the defaults
/// compiled into the object mean "no filtering".
pub fn load<S: ImageSpec>(
    mut spec: S,
    config: &ProbeConfig,
) -> Result<LoadedImage<S::Image>, LoadError> {
    info!("Loading probe object into kernel");

    if let Some(min_us) = config.effective_min_latency_us() {
        spec.set_variable(VAR_MIN_LATENCY_US, VariableValue::U64(min_us))?;
        info!("Set {VAR_MIN_LATENCY_US} to {min_us} us");
    }

    if let Some(tgid) = config.effective_target_tgid() {
        spec.set_variable(VAR_TARGET_TGID, VariableValue::U32(tgid))?;
        info!("Set {VAR_TARGET_TGID} to {tgid}");
    }

    let loaded = spec.finalize()?;
    info!("eBPF program loaded successfully");

    Ok(loaded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VariableKind {
    U32,
    U64,
}

/// Runtime variables the tcpconnlat object exposes
const IMAGE_VARIABLES: [(&str, VariableKind); 2] = [
    (VAR_MIN_LATENCY_US, VariableKind::U64),
    (VAR_TARGET_TGID, VariableKind::U32),
];

/// A tcpconnlat object that has not been loaded yet
pub struct AyaImageSpec {
    data: Cow<'static, [u8]>,
    pin_path: Option<PathBuf>,
    variables: Vec<(&'static str, VariableValue)>,
}

impl AyaImageSpec {
    /// Use the object at `path`, or the embedded object when `path` is None
    pub fn open(path: Option<PathBuf>) -> Result<Self, LoadError> {
        match path {
            Some(obj_path) => Self::from_file(&obj_path),
            None => Self::embedded(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        info!("Loading eBPF object from: {:?}", path);
        let data = std::fs::read(path).map_err(|source| LoadError::ReadImage {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_data(Cow::Owned(data)))
    }

    pub fn from_bytes(data: &'static [u8]) -> Self {
        Self::from_data(Cow::Borrowed(data))
    }

    fn from_data(data: Cow<'static, [u8]>) -> Self {
        Self {
            data,
            pin_path: None,
            variables: Vec::new(),
        }
    }

    #[cfg(feature = "embedded")]
    fn embedded() -> Result<Self, LoadError> {
        info!("Loading embedded eBPF program...");
        Ok(Self::from_bytes(aya::include_bytes_aligned!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../bpf/tcpconnlat.bpf.o"
        ))))
    }

    #[cfg(not(feature = "embedded"))]
    fn embedded() -> Result<Self, LoadError> {
        Err(LoadError::NoImage)
    }

    /// Pin the image's pinnable maps under `path` (a bpffs directory)
    pub fn with_pin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pin_path = Some(path.into());
        self
    }

    fn check_pin_path(&self) -> Result<(), LoadError> {
        if let Some(dir) = &self.pin_path {
            let pinned = dir.join(MAP_EVENTS);
            if pinned.exists() {
                return Err(LoadError::PinCollision(pinned));
            }
        }
        Ok(())
    }
}

impl ImageSpec for AyaImageSpec {
    type Image = AyaImage;

    fn set_variable(&mut self, name: &str, value: VariableValue) -> Result<(), LoadError> {
        let (name, kind) = IMAGE_VARIABLES
            .iter()
            .find(|(known, _)| *known == name)
            .copied()
            .ok_or_else(|| LoadError::UnknownVariable(name.to_string()))?;

        match (kind, value) {
            (VariableKind::U32, VariableValue::U32(_)) | (VariableKind::U64, VariableValue::U64(_)) => {}
            (VariableKind::U32, _) => {
                return Err(LoadError::VariableType {
                    name: name.to_string(),
                    expected: "u32",
                })
            }
            (VariableKind::U64, _) => {
                return Err(LoadError::VariableType {
                    name: name.to_string(),
                    expected: "u64",
                })
            }
        }

        self.variables.retain(|(existing, _)| *existing != name);
        self.variables.push((name, value));
        Ok(())
    }

    fn finalize(self) -> Result<LoadedImage<AyaImage>, LoadError> {
        self.check_pin_path()?;

        let btf = Btf::from_sys_fs().map_err(|e| LoadError::Btf(Box::new(e)))?;

        let mut loader = BpfLoader::new();
        loader.btf(Some(&btf));
        if let Some(dir) = &self.pin_path {
            debug!("Pinning maps under {:?}", dir);
            loader.map_pin_path(dir);
        }
        for (name, value) in &self.variables {
            match value {
                VariableValue::U32(v) => loader.set_global(name, v, true),
                VariableValue::U64(v) => loader.set_global(name, v, true),
            };
        }

        let mut bpf = loader
            .load(&self.data)
            .map_err(|e| LoadError::Image(Box::new(e)))?;

        for point in &TCP_CONNECT_PROBES {
            let program: &mut FEntry = bpf
                .program_mut(point.program)
                .ok_or(LoadError::ProgramNotFound(point.program))?
                .try_into()
                .map_err(|e| program_error(point, e))?;
            program
                .load(point.function, &btf)
                .map_err(|e| program_error(point, e))?;
            debug!("Loaded {} for {}", point.program, point.function);
        }

        let map = bpf
            .take_map(MAP_EVENTS)
            .ok_or(LoadError::MapNotFound(MAP_EVENTS))?;
        let ring_buf = RingBuf::try_from(map).map_err(|e| LoadError::Channel {
            map: MAP_EVENTS,
            source: Box::new(e),
        })?;
        let events = RingBufChannel::new(ring_buf).map_err(|e| LoadError::Channel {
            map: MAP_EVENTS,
            source: Box::new(e),
        })?;

        Ok(LoadedImage {
            image: AyaImage { bpf },
            events,
        })
    }
}

fn program_error(point: &ProbePoint, e: aya::programs::ProgramError) -> LoadError {
    LoadError::Program {
        program: point.program,
        function: point.function,
        source: Box::new(e),
    }
}

/// A tcpconnlat object resident in the kernel
///
/// Dropping it unloads the programs and closes the remaining maps.
pub struct AyaImage {
    bpf: Bpf,
}

/// A live fentry attachment
pub struct AyaLink {
    program: &'static str,
    id: FEntryLinkId,
}

impl AyaImage {
    fn fentry(&mut self, name: &'static str) -> Result<&mut FEntry, BackendError> {
        let program = self
            .bpf
            .program_mut(name)
            .ok_or_else(|| format!("program {name} not found"))?;
        Ok(program.try_into()?)
    }
}

impl ProbeImage for AyaImage {
    type Link = AyaLink;
    type Channel = RingBufChannel;

    fn attach(&mut self, point: &ProbePoint) -> Result<AyaLink, BackendError> {
        let id = self.fentry(point.program)?.attach()?;
        Ok(AyaLink {
            program: point.program,
            id,
        })
    }

    fn detach(&mut self, link: AyaLink) -> Result<(), BackendError> {
        self.fentry(link.program)?.detach(link.id)?;
        Ok(())
    }
}

/// Reader for the `events` ring buffer, driven by epoll readiness
pub struct RingBufChannel {
    fd: AsyncFd<RingBuf<MapData>>,
    closer: ChannelCloser,
}

impl RingBufChannel {
    fn new(ring_buf: RingBuf<MapData>) -> std::io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(ring_buf)?,
            closer: ChannelCloser::new(),
        })
    }
}

impl EventChannel for RingBufChannel {
    fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    async fn read_record(&mut self) -> Result<Bytes, ChannelError> {
        loop {
            if self.closer.is_closed() {
                return Err(ChannelError::Closed);
            }

            let mut guard = tokio::select! {
                biased;
                () = self.closer.closed() => return Err(ChannelError::Closed),
                ready = self.fd.readable_mut() => ready?,
            };

            let record = guard
                .get_inner_mut()
                .next()
                .map(|item| Bytes::copy_from_slice(&item));
            match record {
                Some(record) => return Ok(record),
                None => guard.clear_ready(),
            }
        }
    }
}
