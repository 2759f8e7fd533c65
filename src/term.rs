//! Terminal mode switching for the caller's own terminal
//!
//! The relay puts the real stdin into a mostly-raw mode so keystrokes reach
//! the child unprocessed. Unlike cfmakeraw(3) it keeps output post-processing
//! and the ECHOE/ECHOK/ECHOCTL/ECHOKE editing flags.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::fcntl::OFlag;
use nix::sys::termios::{
    self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
    Termios,
};

use crate::error::{PtyError, PtyResult};
use crate::sys::{get_flags, set_flags};

/// Turn `termios` into the relay's raw variant
pub fn make_raw(termios: &mut Termios) {
    termios.input_flags = InputFlags::empty();
    termios.output_flags = OutputFlags::OPOST | OutputFlags::ONLCR;
    termios.local_flags =
        LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHOCTL | LocalFlags::ECHOKE;
    termios.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
    termios.control_flags |= ControlFlags::CS8;
    termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
}

/// Switch a terminal into raw mode, returning the previous attributes
pub fn enter_raw(fd: BorrowedFd<'_>) -> PtyResult<Termios> {
    let previous = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
    let mut raw = previous.clone();
    make_raw(&mut raw);
    termios::tcsetattr(fd, SetArg::TCSANOW, &raw).map_err(PtyError::Termios)?;
    Ok(previous)
}

/// Write back attributes captured by [`enter_raw`]
pub fn restore(fd: BorrowedFd<'_>, previous: &Termios) -> PtyResult<()> {
    termios::tcsetattr(fd, SetArg::TCSANOW, previous).map_err(PtyError::Termios)
}

/// Saved state of an input descriptor switched to non-blocking (and maybe raw)
#[derive(Debug)]
pub struct InputGuard {
    /// Duplicate of the input descriptor, sharing its open file description
    fd: OwnedFd,
    /// Flags before O_NONBLOCK was added
    flags: OFlag,
    /// Attributes before raw mode, when raw mode was entered
    termios: Option<Termios>,
}

impl InputGuard {
    /// Make `fd` non-blocking and, if `raw`, switch it to raw mode
    ///
    /// On failure everything already changed is rolled back.
    pub fn capture(fd: BorrowedFd<'_>, raw: bool) -> PtyResult<Self> {
        let flags = get_flags(fd).map_err(PtyError::Fcntl)?;
        let fd = fd.try_clone_to_owned()?;
        set_flags(fd.as_fd(), flags | OFlag::O_NONBLOCK).map_err(PtyError::Fcntl)?;

        let mut guard = Self {
            fd,
            flags,
            termios: None,
        };
        if raw {
            match enter_raw(guard.fd.as_fd()) {
                Ok(previous) => guard.termios = Some(previous),
                Err(e) => {
                    let _ = guard.restore();
                    return Err(e);
                },
            }
        }
        Ok(guard)
    }

    /// Pretend raw mode was entered with `termios` as the saved state
    #[cfg(test)]
    pub(crate) fn with_saved_termios(mut self, termios: Termios) -> Self {
        self.termios = Some(termios);
        self
    }

    /// Whether raw mode was entered
    pub fn is_raw(&self) -> bool {
        self.termios.is_some()
    }

    /// Restore attributes and flags
    ///
    /// Both are attempted; the first error is returned.
    pub fn restore(&self) -> PtyResult<()> {
        let attrs = match &self.termios {
            Some(previous) => restore(self.fd.as_fd(), previous),
            None => Ok(()),
        };
        let flags = set_flags(self.fd.as_fd(), self.flags).map_err(PtyError::Fcntl);
        attrs.and(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{NativeAllocator, PtyAllocator};
    use nix::errno::Errno;

    #[test]
    fn test_make_raw_flags() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let mut attrs = termios::tcgetattr(pair.slave.as_fd()).unwrap();
        make_raw(&mut attrs);

        assert!(attrs.input_flags.is_empty());
        assert_eq!(attrs.output_flags, OutputFlags::OPOST | OutputFlags::ONLCR);
        assert_eq!(
            attrs.local_flags,
            LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHOCTL | LocalFlags::ECHOKE
        );
        assert!(attrs.control_flags.contains(ControlFlags::CS8));
        assert!(!attrs.control_flags.contains(ControlFlags::PARENB));
        assert_eq!(attrs.control_chars[SpecialCharacterIndices::VMIN as usize], 1);
        assert_eq!(attrs.control_chars[SpecialCharacterIndices::VTIME as usize], 0);
    }

    #[test]
    fn test_enter_raw_and_restore() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let slave = pair.slave.as_fd();
        let before = termios::tcgetattr(slave).unwrap();

        let previous = enter_raw(slave).unwrap();
        assert_eq!(previous.local_flags, before.local_flags);
        let raw = termios::tcgetattr(slave).unwrap();
        assert!(!raw.local_flags.contains(LocalFlags::ICANON));
        assert!(!raw.local_flags.contains(LocalFlags::ECHO));

        restore(slave, &previous).unwrap();
        let after = termios::tcgetattr(slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.input_flags, before.input_flags);
    }

    #[test]
    fn test_enter_raw_rejects_non_tty() {
        let file = tempfile::tempfile().unwrap();
        assert!(matches!(
            enter_raw(file.as_fd()),
            Err(PtyError::Termios(Errno::ENOTTY))
        ));
    }

    #[test]
    fn test_guard_round_trip_on_tty() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let slave = pair.slave.as_fd();
        let before = termios::tcgetattr(slave).unwrap();

        let guard = InputGuard::capture(slave, true).unwrap();
        assert!(guard.is_raw());
        assert!(get_flags(slave).unwrap().contains(OFlag::O_NONBLOCK));

        guard.restore().unwrap();
        assert!(!get_flags(slave).unwrap().contains(OFlag::O_NONBLOCK));
        assert_eq!(termios::tcgetattr(slave).unwrap().local_flags, before.local_flags);
    }

    #[test]
    fn test_guard_rolls_back_flags_when_raw_fails() {
        let file = tempfile::tempfile().unwrap();
        let err = InputGuard::capture(file.as_fd(), true).unwrap_err();
        assert!(matches!(err, PtyError::Termios(_)));
        assert!(!get_flags(file.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn test_guard_restores_flags_when_attributes_fail() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let attrs = termios::tcgetattr(pair.slave.as_fd()).unwrap();
        let file = tempfile::tempfile().unwrap();

        let guard = InputGuard::capture(file.as_fd(), false)
            .unwrap()
            .with_saved_termios(attrs);
        let err = guard.restore().unwrap_err();
        assert!(matches!(err, PtyError::Termios(Errno::ENOTTY)));
        assert!(!get_flags(file.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn test_guard_without_raw() {
        let file = tempfile::tempfile().unwrap();
        let guard = InputGuard::capture(file.as_fd(), false).unwrap();
        assert!(!guard.is_raw());
        assert!(get_flags(file.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
        guard.restore().unwrap();
        assert!(!get_flags(file.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
    }
}
