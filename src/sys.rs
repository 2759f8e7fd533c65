//! Thin wrappers over ioctl, fcntl and close
//!
//! The ioctl(2) system call manipulates the underlying device parameters of
//! special files. These helpers only translate the C return convention into
//! `nix::Result`; the request codes live with their callers.

use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;

/// Raw ioctl on a borrowed descriptor
///
/// # Safety
/// `arg` must point to memory of the type and size `request` expects.
pub(crate) unsafe fn ioctl<T>(fd: BorrowedFd<'_>, request: u64, arg: *mut T) -> nix::Result<()> {
    Errno::result(libc::ioctl(fd.as_raw_fd(), request as _, arg)).map(drop)
}

/// Read the file status flags
pub(crate) fn get_flags(fd: BorrowedFd<'_>) -> nix::Result<OFlag> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map(OFlag::from_bits_truncate)
}

/// Replace the file status flags
pub(crate) fn set_flags(fd: BorrowedFd<'_>, flags: OFlag) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map(drop)
}

/// Close a descriptor and report the error that `Drop` would swallow
pub(crate) fn close_fd(fd: impl IntoRawFd) -> nix::Result<()> {
    nix::unistd::close(fd.into_raw_fd())
}
