//! Child process attachment
//!
//! The child is launched with `std::process::Command`; this module only
//! points its standard streams at the pty slave and makes it a session
//! leader before exec.

use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use nix::libc;
use nix::unistd::setsid;

use crate::error::PtyResult;

/// Where the input pump reads from
pub enum Input {
    /// The process's own stdin; switched to raw mode when it is a terminal
    Stdin,
    /// An open file; made non-blocking for the session
    File(File),
    /// Any other byte source; read as-is
    Reader(Box<dyn Read + Send>),
}

impl Input {
    /// Wrap an arbitrary reader
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Input::Reader(Box::new(reader))
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Stdin => f.write_str("Stdin"),
            Input::File(file) => f.debug_tuple("File").field(file).finish(),
            Input::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// An unlaunched command plus the streams relayed to and from its pty
pub struct PtyCommand {
    pub(crate) command: Command,
    pub(crate) input: Option<Input>,
    pub(crate) output: Option<Box<dyn Write + Send>>,
}

impl PtyCommand {
    /// Command running `program`
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self::from_command(Command::new(program))
    }

    /// Wrap an existing command
    ///
    /// Its stdio settings are replaced by the pty slave on spawn.
    pub fn from_command(command: Command) -> Self {
        Self {
            command,
            input: None,
            output: None,
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    /// Add arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.command.env(key, value);
        self
    }

    /// Relay bytes from `input` into the pty
    pub fn stdin(mut self, input: Input) -> Self {
        self.input = Some(input);
        self
    }

    /// Relay pty output into `sink`
    pub fn stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.output = Some(Box::new(sink));
        self
    }

    /// Access the underlying command
    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }
}

impl fmt::Debug for PtyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyCommand")
            .field("command", &self.command)
            .field("input", &self.input)
            .field("output", &self.output.is_some())
            .finish()
    }
}

/// Bind `slave` to the command's stdio and make the child a session leader
///
/// No controlling terminal is assigned unless `controlling_terminal` is set,
/// in which case the child claims the slave with TIOCSCTTY after setsid.
pub fn attach(
    command: &mut Command,
    slave: BorrowedFd<'_>,
    controlling_terminal: bool,
) -> PtyResult<()> {
    command
        .stdin(Stdio::from(slave.try_clone_to_owned()?))
        .stdout(Stdio::from(slave.try_clone_to_owned()?))
        .stderr(Stdio::from(slave.try_clone_to_owned()?));

    // SAFETY: the hook only calls async-signal-safe setsid and ioctl
    unsafe {
        command.pre_exec(move || {
            setsid()?;
            if controlling_terminal
                && libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) < 0
            {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{NativeAllocator, PtyAllocator};
    use nix::unistd::{getsid, Pid};
    use std::os::fd::AsFd;

    #[test]
    fn test_builder_collects_streams() {
        let cmd = PtyCommand::new("cat")
            .arg("-u")
            .stdin(Input::reader(io::empty()))
            .stdout(io::sink());
        assert!(matches!(cmd.input, Some(Input::Reader(_))));
        assert!(cmd.output.is_some());
        assert_eq!(cmd.command.get_args().count(), 1);
    }

    #[test]
    fn test_attached_child_leads_new_session() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let mut command = Command::new("cat");
        attach(&mut command, pair.slave.as_fd(), false).unwrap();
        let mut child = command.spawn().unwrap();

        let pid = Pid::from_raw(child.id() as i32);
        assert_eq!(getsid(Some(pid)).unwrap(), pid);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_attached_child_can_claim_ctty() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let mut command = Command::new("sh");
        command.args(["-c", "exec </dev/tty"]);
        attach(&mut command, pair.slave.as_fd(), true).unwrap();
        let status = command.spawn().unwrap().wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_attached_child_has_no_ctty_by_default() {
        let pair = NativeAllocator::default().allocate().unwrap();
        let mut command = Command::new("sh");
        command.args(["-c", "exec </dev/tty"]);
        attach(&mut command, pair.slave.as_fd(), false).unwrap();
        let status = command.spawn().unwrap().wait().unwrap();
        assert!(!status.success());
    }
}
