//! Linux PTY allocation
//!
//! Linux exposes the pairing steps as ioctls on the `/dev/ptmx` master:
//! permissions are already correct on devpts, `TIOCSPTLCK` releases the
//! lock, and `TIOCGPTN` returns the slave index under `/dev/pts`.

use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;

use nix::libc;

use super::{open_ptmx, PtyAllocator};
use crate::error::{PtyError, PtyResult};
use crate::sys::ioctl;

/// Allocator using the Linux devpts ioctls
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxAllocator;

impl PtyAllocator for LinuxAllocator {
    type Master = OwnedFd;

    fn open_master(&self) -> PtyResult<OwnedFd> {
        open_ptmx()
    }

    fn grant(&self, _master: &OwnedFd) -> PtyResult<()> {
        // devpts creates the slave with the caller's uid and mode 0620
        Ok(())
    }

    fn unlock(&self, master: &OwnedFd) -> PtyResult<()> {
        let mut lock: libc::c_int = 0;
        // SAFETY: TIOCSPTLCK reads an int
        unsafe { ioctl(master.as_fd(), libc::TIOCSPTLCK as u64, &mut lock) }
            .map_err(PtyError::Unlock)
    }

    fn slave_path(&self, master: &OwnedFd) -> PtyResult<PathBuf> {
        let mut index: libc::c_uint = 0;
        // SAFETY: TIOCGPTN writes an unsigned int
        unsafe { ioctl(master.as_fd(), libc::TIOCGPTN as u64, &mut index) }
            .map_err(PtyError::SlaveName)?;
        Ok(pts_path(index))
    }
}

fn pts_path(index: libc::c_uint) -> PathBuf {
    PathBuf::from(format!("/dev/pts/{index}"))
}
