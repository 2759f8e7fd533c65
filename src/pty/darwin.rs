//! macOS PTY allocation
//!
//! Darwin's `/dev/ptmx` needs explicit `TIOCPTYGRANT` and `TIOCPTYUNLK`
//! ioctls, and `TIOCPTYGNAME` copies the slave name into a fixed buffer.

use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;
use std::ptr;

use nix::libc;

use super::{open_ptmx, parse_slave_name, PtyAllocator};
use crate::error::{PtyError, PtyResult};
use crate::sys::ioctl;

/// Size of the buffer `TIOCPTYGNAME` fills, encoded in the request itself
const NAME_LEN: usize = ((libc::TIOCPTYGNAME as u64 >> 16) & ((1 << 13) - 1)) as usize;

/// Allocator using the Darwin ptmx ioctls
#[derive(Debug, Default, Clone, Copy)]
pub struct DarwinAllocator;

impl PtyAllocator for DarwinAllocator {
    type Master = OwnedFd;

    fn open_master(&self) -> PtyResult<OwnedFd> {
        open_ptmx()
    }

    fn grant(&self, master: &OwnedFd) -> PtyResult<()> {
        let request = libc::TIOCPTYGRANT as u64;
        // SAFETY: TIOCPTYGRANT takes no argument
        unsafe { ioctl(master.as_fd(), request, ptr::null_mut::<libc::c_int>()) }
            .map_err(PtyError::Grant)
    }

    fn unlock(&self, master: &OwnedFd) -> PtyResult<()> {
        let request = libc::TIOCPTYUNLK as u64;
        // SAFETY: TIOCPTYUNLK takes no argument
        unsafe { ioctl(master.as_fd(), request, ptr::null_mut::<libc::c_int>()) }
            .map_err(PtyError::Unlock)
    }

    fn slave_path(&self, master: &OwnedFd) -> PtyResult<PathBuf> {
        let mut name = [0u8; NAME_LEN];
        // SAFETY: TIOCPTYGNAME writes at most NAME_LEN bytes
        unsafe { ioctl(master.as_fd(), libc::TIOCPTYGNAME as u64, name.as_mut_ptr()) }
            .map_err(PtyError::SlaveName)?;
        parse_slave_name(&name)
    }
}
