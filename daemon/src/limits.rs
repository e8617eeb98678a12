//! Locked memory limit handling
//!
//! Maps and programs are charged against `RLIMIT_MEMLOCK` on kernels before
//! 5.11. Newer kernels account BPF memory through memory cgroups and ignore
//! the limit (see <https://lwn.net/Articles/837122/>).

use crate::error::LimitError;
use log::{debug, info, warn};
use std::{fs, io};

const MIB: u64 = 1024 * 1024;

/// Soft RLIMIT_MEMLOCK applied before loading
pub const MEMLOCK_SOFT_LIMIT: u64 = 20 * MIB;

/// Hard RLIMIT_MEMLOCK applied before loading
pub const MEMLOCK_HARD_LIMIT: u64 = 40 * MIB;

/// First kernel release that charges BPF memory to memcg
const MEMCG_ACCOUNTING_SINCE: (u32, u32) = (5, 11);

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// Outcome of [`raise_memlock_limit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemlockLimit {
    /// The fixed soft/hard limits were applied
    Fixed { soft: u64, hard: u64 },
    /// The limit was removed
    Unlimited,
    /// The kernel does not charge BPF memory to RLIMIT_MEMLOCK
    NotEnforced,
}

/// Raise RLIMIT_MEMLOCK so the instrumentation state can be allocated
///
/// Must run before anything is loaded.
pub fn raise_memlock_limit() -> Result<MemlockLimit, LimitError> {
    let memcg = match kernel_release() {
        Ok(release) => memcg_accounts_bpf(&release),
        Err(e) => {
            debug!("could not read {OSRELEASE_PATH}: {e}");
            false
        }
    };

    apply_policy(set_memlock, memcg)
}

fn apply_policy<F>(mut set: F, memcg: bool) -> Result<MemlockLimit, LimitError>
where
    F: FnMut(u64, u64) -> io::Result<()>,
{
    info!("Setting rlimit");

    let fixed_err = match set(MEMLOCK_SOFT_LIMIT, MEMLOCK_HARD_LIMIT) {
        Ok(()) => {
            return Ok(MemlockLimit::Fixed {
                soft: MEMLOCK_SOFT_LIMIT,
                hard: MEMLOCK_HARD_LIMIT,
            })
        }
        Err(e) => e,
    };
    debug!("fixed memlock limit rejected: {fixed_err}");

    match set(libc::RLIM_INFINITY, libc::RLIM_INFINITY) {
        Ok(()) => Ok(MemlockLimit::Unlimited),
        Err(e) if memcg => {
            debug!("removing memlock limit failed ({e}), not needed on this kernel");
            Ok(MemlockLimit::NotEnforced)
        }
        Err(e) => {
            warn!("Failed setting infinite rlimit: {e}");
            Err(LimitError::Setrlimit(fixed_err))
        }
    }
}

fn set_memlock(soft: u64, hard: u64) -> io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: rlim is a valid, initialised rlimit for the duration of the call
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn kernel_release() -> io::Result<String> {
    Ok(fs::read_to_string(OSRELEASE_PATH)?.trim().to_string())
}

/// Parse `major.minor` from a kernel release string such as `6.8.0-45-generic`
pub fn parse_kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Whether this kernel accounts BPF memory via memcg instead of RLIMIT_MEMLOCK
pub fn memcg_accounts_bpf(release: &str) -> bool {
    parse_kernel_version(release).is_some_and(|version| version >= MEMCG_ACCOUNTING_SINCE)
}
