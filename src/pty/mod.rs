//! PTY pair allocation
//!
//! Opening a pseudoterminal takes four steps whose primitives differ per
//! platform:
//!
//! 1. open the multiplexer device to get the master
//! 2. grant access to the slave
//! 3. unlock the slave
//! 4. resolve the slave's path
//!
//! [`PtyAllocator`] names those steps; [`PtyAllocator::allocate`] chains them
//! and opens the slave. Everything above this module is written against the
//! trait, so only the allocator differs between platforms.
//!
//! # References
//!
//! - posix_openpt(3): https://man7.org/linux/man-pages/man3/posix_openpt.3.html
//! - grantpt(3), unlockpt(3), ptsname(3)
//! - pts(4): https://man7.org/linux/man-pages/man4/pts.4.html

use std::ffi::{CStr, OsStr};
use std::fs::OpenOptions;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::libc;

use crate::error::{PtyError, PtyResult};

#[cfg(target_os = "macos")]
mod darwin;
#[cfg(target_os = "linux")]
mod linux;
mod posix;

#[cfg(target_os = "macos")]
pub use darwin::DarwinAllocator;
#[cfg(target_os = "linux")]
pub use linux::LinuxAllocator;
pub use posix::PosixAllocator;

/// Allocator used by default on this platform
#[cfg(target_os = "linux")]
pub type NativeAllocator = LinuxAllocator;

/// Allocator used by default on this platform
#[cfg(target_os = "macos")]
pub type NativeAllocator = DarwinAllocator;

/// Allocator used by default on this platform
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub type NativeAllocator = PosixAllocator;

/// Path of the pty multiplexer device
pub const PTMX_PATH: &str = "/dev/ptmx";

/// An open master/slave pair with nothing attached yet
#[derive(Debug)]
pub struct PtyPair {
    /// Controlling side
    pub master: OwnedFd,
    /// Subordinate side, opened read/write without becoming our ctty
    pub slave: OwnedFd,
    /// Device path of the subordinate side
    pub slave_path: PathBuf,
}

/// Capability to allocate a pty pair
///
/// The master is owned from the moment it is opened, so a step that fails
/// afterwards releases it when the error propagates.
pub trait PtyAllocator {
    /// Master handle the pairing steps operate on
    type Master: IntoRawFd;

    /// Open the master side
    fn open_master(&self) -> PtyResult<Self::Master>;

    /// Grant access to the slave side
    fn grant(&self, master: &Self::Master) -> PtyResult<()>;

    /// Unlock the slave side
    fn unlock(&self, master: &Self::Master) -> PtyResult<()>;

    /// Resolve the path of the slave side
    fn slave_path(&self, master: &Self::Master) -> PtyResult<PathBuf>;

    /// Allocate a full pair
    fn allocate(&self) -> PtyResult<PtyPair> {
        let master = self.open_master()?;
        self.grant(&master)?;
        self.unlock(&master)?;
        let slave_path = self.slave_path(&master)?;
        let slave = open_slave(&slave_path)?;

        tracing::debug!(slave = %slave_path.display(), "allocated pty pair");

        Ok(PtyPair {
            master: into_owned_fd(master),
            slave,
            slave_path,
        })
    }
}

/// Take ownership of a master handle as a plain descriptor
fn into_owned_fd(master: impl IntoRawFd) -> OwnedFd {
    // SAFETY: into_raw_fd gives up ownership, nothing else will close it
    unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) }
}

/// Open the multiplexer device
pub(crate) fn open_ptmx() -> PtyResult<OwnedFd> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
        .open(PTMX_PATH)
        .map(OwnedFd::from)
        .map_err(PtyError::OpenMaster)
}

/// Open the slave side for read/write
pub fn open_slave(path: &Path) -> PtyResult<OwnedFd> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .map(OwnedFd::from)
        .map_err(PtyError::OpenSlave)
}

/// Extract the slave path from a name buffer filled by the kernel
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn parse_slave_name(buf: &[u8]) -> PtyResult<PathBuf> {
    let name = CStr::from_bytes_until_nul(buf).map_err(|_| PtyError::SlaveNameUnterminated)?;
    Ok(PathBuf::from(OsStr::from_bytes(name.to_bytes())))
}
