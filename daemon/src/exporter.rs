//! Event sinks
//!
//! Decoded events are forwarded to an [`EventSink`]. The console table is the
//! default; JSON lines are available for piping into other tools.

use crate::{
    codec,
    types::{DisplayRow, Event},
};
use anyhow::{bail, Result};
use serde::Serialize;
use std::{
    io::{self, Write},
    str::FromStr,
};

/// Trait for event sinks
pub trait EventSink: Send + 'static {
    /// Write the column header. Called once before the first event.
    fn header(&mut self) -> Result<()>;

    /// Write one event
    fn emit(&mut self, event: &Event) -> Result<()>;
}

impl EventSink for Box<dyn EventSink> {
    fn header(&mut self) -> Result<()> {
        (**self).header()
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        (**self).emit(event)
    }
}

/// Output format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Fixed-width console table
    Table,
    /// One JSON object per line
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" | "jsonl" => Ok(OutputFormat::Json),
            _ => bail!("Unsupported format: {s}. Use table or json"),
        }
    }
}

impl OutputFormat {
    /// Sink writing this format to stdout
    pub fn stdout_sink(self) -> Box<dyn EventSink> {
        match self {
            OutputFormat::Table => Box::new(TableSink::new(io::stdout())),
            OutputFormat::Json => Box::new(JsonSink::new(io::stdout())),
        }
    }
}

/// Console table sink
pub struct TableSink<W> {
    out: W,
}

impl<W: Write> TableSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> EventSink for TableSink<W> {
    fn header(&mut self) -> Result<()> {
        writeln!(self.out, "{}", DisplayRow::header())?;
        self.out.flush()?;
        Ok(())
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        writeln!(self.out, "{}", codec::render(event))?;
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    time: String,
    ts_us: u64,
    pid: u32,
    comm: &'a str,
    ip: &'static str,
    saddr: &'a str,
    lport: u16,
    daddr: &'a str,
    dport: u16,
    latency_us: u64,
    latency_ms: f64,
}

/// JSON lines sink
pub struct JsonSink<W> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> EventSink for JsonSink<W> {
    fn header(&mut self) -> Result<()> {
        Ok(())
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let comm = event.comm();
        let (saddr, daddr) = event.addresses.to_strings();
        let record = JsonRecord {
            time: chrono::Utc::now().to_rfc3339(),
            ts_us: event.timestamp_us,
            pid: event.tgid,
            comm: &comm,
            ip: event.addresses.version_tag(),
            saddr: &saddr,
            lport: event.lport,
            daddr: &daddr,
            dport: event.dport,
            latency_us: event.latency_us,
            latency_ms: event.latency_ms(),
        };

        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}
