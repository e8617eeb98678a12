//! tcpconnlat - trace TCP connect latency
//!
//! Loads the instrumentation image, attaches to the kernel's TCP connect
//! paths and prints one row per connection until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Trace all connects
//! sudo ./tcpconnlat --ebpf-object bpf/tcpconnlat.bpf.o
//!
//! # Only connects slower than 10ms, from process 1234
//! sudo ./tcpconnlat --ebpf-object bpf/tcpconnlat.bpf.o --min 10000 --pid 1234
//!
//! # JSON lines
//! sudo ./tcpconnlat --ebpf-object bpf/tcpconnlat.bpf.o --format json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::{path::PathBuf, time::Duration};
use tcpconnlat::{
    limits, AyaImageSpec, Lifecycle, OutputFormat, ProbeConfig, RetryPolicy,
};
use tokio::signal::{
    self,
    unix::{signal as unix_signal, SignalKind},
};

/// Trace TCP connect latency using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Only report connects slower than this many microseconds
    #[clap(short, long = "min", value_name = "US")]
    min_latency_us: Option<u64>,

    /// Only report connects made by this process group id
    #[clap(short, long)]
    pid: Option<u32>,

    /// Path to eBPF object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// bpffs directory to pin maps under
    #[clap(long)]
    pin_path: Option<PathBuf>,

    /// Output format (table, json)
    #[clap(short, long, default_value = "table")]
    format: OutputFormat,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Initial delay after a failed ring buffer read, in milliseconds
    #[clap(long, default_value_t = 10)]
    retry_backoff_ms: u64,

    /// Upper bound for the read retry delay, in milliseconds
    #[clap(long, default_value_t = 1000)]
    retry_backoff_max_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Starting tcpconnlat...");
    let config = ProbeConfig {
        min_latency_us: args.min_latency_us,
        target_tgid: args.pid,
    };
    if let Some(min_us) = config.effective_min_latency_us() {
        info!("   Min latency: {} us", min_us);
    }
    if let Some(tgid) = config.effective_target_tgid() {
        info!("   PID: {}", tgid);
    }

    let mut spec = AyaImageSpec::open(args.ebpf_object.clone())
        .context("Failed to open eBPF object")?;
    if let Some(dir) = &args.pin_path {
        spec = spec.with_pin_path(dir);
    }

    let retry = RetryPolicy {
        initial: Duration::from_millis(args.retry_backoff_ms),
        max: Duration::from_millis(args.retry_backoff_max_ms),
    };

    let mut lifecycle = Lifecycle::new(config, retry);
    lifecycle
        .run(
            spec,
            limits::raise_memlock_limit,
            args.format.stdout_sink(),
            shutdown_signal(),
        )
        .await
        .context("Failed to trace TCP connects")?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let terminate = async {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                log::warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await
            }
            debug!("Interrupted, shutting down...");
        }
        () = terminate => {
            debug!("Terminated, shutting down...");
        }
    }
}
