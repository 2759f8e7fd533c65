//! Portable PTY allocation through the posix_openpt family
//!
//! Works on any Unix libc. Outside Linux only the non-reentrant
//! `ptsname(3)` exists, so those calls are serialized by a process-wide lock.

use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};

use super::PtyAllocator;
use crate::error::{PtyError, PtyResult};

/// Allocator using posix_openpt, grantpt, unlockpt and ptsname
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixAllocator;

impl PtyAllocator for PosixAllocator {
    type Master = PtyMaster;

    fn open_master(&self) -> PtyResult<PtyMaster> {
        open_master().map_err(|e| PtyError::OpenMaster(e.into()))
    }

    fn grant(&self, master: &PtyMaster) -> PtyResult<()> {
        grantpt(master).map_err(PtyError::Grant)
    }

    fn unlock(&self, master: &PtyMaster) -> PtyResult<()> {
        unlockpt(master).map_err(PtyError::Unlock)
    }

    fn slave_path(&self, master: &PtyMaster) -> PtyResult<PathBuf> {
        slave_name(master).map(PathBuf::from).map_err(PtyError::SlaveName)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_master() -> nix::Result<PtyMaster> {
    posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
}

/// posix_openpt only accepts O_RDWR and O_NOCTTY here
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_master() -> nix::Result<PtyMaster> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)?;
    fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(master)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn slave_name(master: &PtyMaster) -> nix::Result<String> {
    nix::pty::ptsname_r(master)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn slave_name(master: &PtyMaster) -> nix::Result<String> {
    use parking_lot::{const_mutex, Mutex};

    static PTSNAME_LOCK: Mutex<()> = const_mutex(());

    let _guard = PTSNAME_LOCK.lock();
    // SAFETY: ptsname's static buffer is only touched while holding PTSNAME_LOCK
    unsafe { nix::pty::ptsname(master) }
}
