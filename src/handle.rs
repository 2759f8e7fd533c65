//! The public PTY handle
//!
//! [`Pty`] owns every resource created for a session: the master and slave
//! descriptors, the child, the pumps and the saved state of the caller's
//! input. Construction rolls back on any failure; teardown runs exactly once,
//! from [`Pty::close`], from the [`Pty::wait`] watcher when the child exits,
//! or from `Drop`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::unistd::{isatty, Pid};
use parking_lot::Mutex;

use crate::child::{attach, Input, PtyCommand};
use crate::config::PtyConfig;
use crate::error::{PtyError, PtyResult};
use crate::pty::{NativeAllocator, PtyAllocator, PtyPair};
use crate::pump::{Pumps, ShutdownSignal};
use crate::size::{get_window_size, set_window_size, WindowSize};
use crate::sys::close_fd;
use crate::term::InputGuard;

/// Lifecycle of a [`Pty`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Running = 0,
    Closing = 1,
    Closed = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Running,
            1 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// A child process running on its own pseudoterminal
///
/// Bytes from the command's input are relayed into the pty and the pty's
/// output is relayed into the command's sink. With no sink, output can be
/// read directly with [`Pty::read`].
pub struct Pty {
    inner: Arc<Inner>,
    slave_path: PathBuf,
}

/// Everything released by teardown, taken out exactly once
struct Resources {
    slave: OwnedFd,
    input: Option<InputGuard>,
    pumps: Pumps,
}

/// Outcome of one non-blocking reap attempt
enum Reap {
    Running,
    Reaped(io::Result<ExitStatus>),
    /// Teardown took the child
    Taken,
}

struct Inner {
    pid: Pid,
    master: Mutex<Option<Arc<File>>>,
    /// Present until reaped; whoever takes it out is the only one to signal it
    child: Mutex<Option<Child>>,
    status: Mutex<Option<ExitStatus>>,
    poll_interval: Duration,
    shutdown: ShutdownSignal,
    state: AtomicU8,
    resources: Mutex<Option<Resources>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Pty {
    /// Spawn `command` on a new pty with the default configuration
    pub fn spawn(command: PtyCommand) -> PtyResult<Self> {
        Self::spawn_with(command, PtyConfig::default())
    }

    /// Spawn `command` on a new pty
    pub fn spawn_with(command: PtyCommand, config: PtyConfig) -> PtyResult<Self> {
        Self::spawn_with_allocator(command, config, &NativeAllocator::default())
    }

    /// Spawn `command` on a pty obtained from `allocator`
    pub fn spawn_with_allocator<A: PtyAllocator>(
        command: PtyCommand,
        config: PtyConfig,
        allocator: &A,
    ) -> PtyResult<Self> {
        config.validate()?;

        let PtyCommand {
            mut command,
            input,
            output,
        } = command;

        let PtyPair {
            master,
            slave,
            slave_path,
        } = allocator.allocate()?;

        let (guard, source) = prepare_input(input, &config)?;
        let rollback_input = |err: PtyError| {
            if let Some(guard) = &guard {
                if let Err(e) = guard.restore() {
                    tracing::warn!("failed to restore input after setup error: {}", e);
                }
            }
            err
        };

        let size = config
            .initial_size
            .unwrap_or_else(|| detect_size(config.default_size));
        set_window_size(master.as_fd(), size).map_err(rollback_input)?;

        attach(&mut command, slave.as_fd(), config.controlling_terminal).map_err(rollback_input)?;
        let mut child = command
            .spawn()
            .map_err(|e| rollback_input(PtyError::Spawn(e)))?;
        drop(command);

        let pid = Pid::from_raw(child.id() as i32);
        tracing::debug!(
            %pid,
            slave = %slave_path.display(),
            rows = size.rows,
            cols = size.cols,
            "spawned child on pty"
        );

        let master = Arc::new(File::from(master));
        let shutdown = ShutdownSignal::new();
        let pumps = match Pumps::start(&master, source, output, &shutdown, &config) {
            Ok(pumps) => pumps,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(rollback_input(e));
            },
        };

        tracing::debug!(%pid, pumps = pumps.len(), "pumps started");

        let inner = Inner {
            pid,
            master: Mutex::new(Some(master)),
            child: Mutex::new(Some(child)),
            status: Mutex::new(None),
            poll_interval: config.poll_interval(),
            shutdown,
            state: AtomicU8::new(LifecycleState::Running as u8),
            resources: Mutex::new(Some(Resources {
                slave,
                input: guard,
                pumps,
            })),
            watcher: Mutex::new(None),
        };

        Ok(Self {
            inner: Arc::new(inner),
            slave_path,
        })
    }

    /// Set the window size of the pty
    pub fn set_size(&self, rows: u16, cols: u16) -> PtyResult<()> {
        let master = self.inner.master().ok_or(PtyError::Closed)?;
        set_window_size(master.as_fd(), WindowSize::new(rows, cols))
    }

    /// Get the window size of the pty
    pub fn get_size(&self) -> PtyResult<WindowSize> {
        let master = self.inner.master().ok_or(PtyError::Closed)?;
        get_window_size(master.as_fd())
    }

    /// Read child output directly from the master
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.inner.master_io()?).read(buf)
    }

    /// Write input directly to the master
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        (&*self.inner.master_io()?).write(buf)
    }

    /// Notify when the child exits
    ///
    /// A watcher thread reaps the child, tears the session down and then
    /// sends the exit status (or the teardown error). If the session was
    /// already closed the recorded status is sent immediately.
    pub fn wait(&self) -> Receiver<PtyResult<ExitStatus>> {
        let (tx, rx) = mpsc::sync_channel(1);

        let mut watcher = self.inner.watcher.lock();
        if let Some(handle) = watcher.as_ref() {
            let result = if handle.is_finished() {
                self.inner.recorded_status()
            } else {
                Err(PtyError::WaitInProgress)
            };
            let _ = tx.send(result);
            return rx;
        }
        if self.inner.child.lock().is_none() {
            // Reaped by teardown; wait for it to finish recording the status
            drop(watcher);
            let _ = tx.send(self.inner.close().and_then(|()| self.inner.recorded_status()));
            return rx;
        }

        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name("pty-wait".to_string())
            .spawn(move || inner.watch(tx))
        {
            Ok(handle) => *watcher = Some(handle),
            Err(e) => tracing::warn!("failed to start pty wait thread: {}", e),
        }
        rx
    }

    /// Terminate the child and release every resource
    ///
    /// Safe to call repeatedly; calls after the first return `Ok(())`.
    ///
    /// A [`Pty::read`] or [`Pty::write`] still blocked on another thread
    /// keeps the master open until it returns; the descriptor is closed when
    /// that call drops its reference, not by `close` itself.
    pub fn close(&self) -> PtyResult<()> {
        self.inner.close()
    }

    /// Child process ID
    pub fn pid(&self) -> u32 {
        self.inner.pid.as_raw() as u32
    }

    /// Device path of the slave side
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }
}

impl Read for Pty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Pty::read(self, buf)
    }
}

impl Read for &Pty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Pty::read(*self, buf)
    }
}

impl Write for Pty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Pty::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &Pty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Pty::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            tracing::warn!("error closing pty on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for Pty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pty")
            .field("pid", &self.inner.pid)
            .field("slave_path", &self.slave_path)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn master(&self) -> Option<Arc<File>> {
        self.master.lock().clone()
    }

    fn master_io(&self) -> io::Result<Arc<File>> {
        self.master()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, PtyError::Closed))
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
        tracing::debug!(pid = %self.pid, ?state, "pty state");
    }

    fn recorded_status(&self) -> PtyResult<ExitStatus> {
        (*self.status.lock()).ok_or(PtyError::Closed)
    }

    fn close(&self) -> PtyResult<()> {
        let result = {
            let mut resources = self.resources.lock();
            match resources.take() {
                Some(taken) => {
                    self.set_state(LifecycleState::Closing);
                    let result = self.tear_down(taken);
                    self.set_state(LifecycleState::Closed);
                    result
                },
                None => Ok(()),
            }
        };
        self.join_watcher();
        result
    }

    /// Kill, signal, restore, close, join
    fn tear_down(&self, resources: Resources) -> PtyResult<()> {
        self.terminate_child();

        if self.shutdown.trigger() {
            tracing::debug!(pid = %self.pid, "shutdown signalled");
        }

        if let Some(input) = &resources.input {
            tracing::debug!(raw = input.is_raw(), "restoring input");
            if let Err(e) = input.restore() {
                tracing::warn!("failed to restore input terminal: {}", e);
            }
        }

        // Closing the slave hangs up the master, ending a blocked output pump
        let slave = close_fd(resources.slave).map_err(PtyError::Close);
        resources.pumps.join();

        // Pumps hold the master until they exit, so this is the last owner
        let master = match self.master.lock().take().map(Arc::try_unwrap) {
            Some(Ok(file)) => close_fd(file).map_err(PtyError::Close),
            // A caller is mid read/write; the descriptor closes when it returns
            Some(Err(_)) | None => Ok(()),
        };

        first_error([slave, master])
    }

    /// Kill and reap the child unless the watcher already reaped it
    fn terminate_child(&self) {
        let taken = self.child.lock().take();
        if let Some(mut child) = taken {
            let _ = child.kill();
            match child.wait() {
                Ok(status) => *self.status.lock() = Some(status),
                Err(e) => tracing::warn!("failed to reap child: {}", e),
            }
        }
    }

    /// Reap the child if it has exited, without blocking
    ///
    /// The child stays under its lock until reaped, so teardown can never
    /// signal a pid that was already released.
    fn try_reap(&self) -> Reap {
        let mut child = self.child.lock();
        let Some(running) = child.as_mut() else {
            return Reap::Taken;
        };
        let result = match running.try_wait() {
            Ok(None) => return Reap::Running,
            Ok(Some(status)) => Ok(status),
            Err(e) => Err(e),
        };
        *child = None;
        Reap::Reaped(result)
    }

    fn join_watcher(&self) {
        let mut watcher = self.watcher.lock();
        let is_self = watcher
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id());
        if is_self {
            return;
        }
        if let Some(handle) = watcher.take() {
            drop(watcher);
            if handle.join().is_err() {
                tracing::warn!("pty wait thread panicked");
            }
        }
    }

    /// Body of the wait watcher
    fn watch(&self, tx: SyncSender<PtyResult<ExitStatus>>) {
        let result = loop {
            match self.try_reap() {
                Reap::Running => thread::sleep(self.poll_interval),
                Reap::Reaped(Ok(status)) => {
                    tracing::debug!(pid = %self.pid, %status, "child exited");
                    *self.status.lock() = Some(status);
                    break self.close().map(|()| status);
                },
                Reap::Reaped(Err(e)) => {
                    let _ = self.close();
                    break Err(PtyError::Wait(e));
                },
                // Teardown got the child first
                Reap::Taken => break self.close().and_then(|()| self.recorded_status()),
            }
        };
        let _ = tx.send(result);
    }
}

/// Turn the command's input into a pump source, saving descriptor state
fn prepare_input(
    input: Option<Input>,
    config: &PtyConfig,
) -> PtyResult<(Option<InputGuard>, Option<Box<dyn Read + Send>>)> {
    match input {
        None => Ok((None, None)),
        Some(Input::Reader(reader)) => Ok((None, Some(reader))),
        Some(Input::File(file)) => {
            let guard = InputGuard::capture(file.as_fd(), false)?;
            Ok((Some(guard), Some(Box::new(file))))
        },
        Some(Input::Stdin) => {
            let stdin = io::stdin();
            let raw = config.raw_mode && isatty(stdin.as_raw_fd()).unwrap_or(false);
            let source = File::from(stdin.as_fd().try_clone_to_owned()?);
            let guard = InputGuard::capture(stdin.as_fd(), raw)?;
            Ok((Some(guard), Some(Box::new(source))))
        },
    }
}

/// Every step already ran; report the earliest failure
fn first_error<const N: usize>(results: [PtyResult<()>; N]) -> PtyResult<()> {
    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

/// Size of the real terminal on stdin, or `fallback`
fn detect_size(fallback: WindowSize) -> WindowSize {
    match get_window_size(io::stdin().as_fd()) {
        Ok(size) if !size.is_empty() => size,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_u8() {
        assert_eq!(LifecycleState::from_u8(0), LifecycleState::Running);
        assert_eq!(LifecycleState::from_u8(1), LifecycleState::Closing);
        assert_eq!(LifecycleState::from_u8(2), LifecycleState::Closed);
    }

    #[test]
    fn test_first_error_wins() {
        use nix::errno::Errno;

        let result = first_error([
            Ok(()),
            Err(PtyError::Close(Errno::EBADF)),
            Err(PtyError::Close(Errno::EIO)),
        ]);
        assert!(matches!(result, Err(PtyError::Close(Errno::EBADF))));
        assert!(first_error([Ok(()), Ok(())]).is_ok());
    }

    #[test]
    fn test_failed_restore_does_not_stop_teardown() {
        use crate::sys::get_flags;
        use nix::fcntl::OFlag;
        use nix::sys::termios::tcgetattr;

        let file = tempfile::tempfile().unwrap();
        let probe = file.try_clone().unwrap();
        let pty = Pty::spawn(PtyCommand::new("cat").stdin(Input::File(file))).unwrap();

        // Attributes of a pty cannot be written back to a regular file
        let pair = NativeAllocator::default().allocate().unwrap();
        let attrs = tcgetattr(pair.slave.as_fd()).unwrap();
        {
            let mut resources = pty.inner.resources.lock();
            let resources = resources.as_mut().unwrap();
            let guard = resources.input.take().unwrap();
            resources.input = Some(guard.with_saved_termios(attrs));
        }

        pty.close().unwrap();
        assert_eq!(pty.state(), LifecycleState::Closed);
        assert!(pty.inner.master().is_none());
        assert!(pty.inner.status.lock().is_some());
        assert!(!get_flags(probe.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn test_reaped_child_is_not_signalled() {
        let pty = Pty::spawn(PtyCommand::new("true")).unwrap();
        let status = loop {
            match pty.inner.try_reap() {
                Reap::Running => thread::sleep(Duration::from_millis(10)),
                Reap::Reaped(result) => break result.unwrap(),
                Reap::Taken => panic!("child taken before it was reaped"),
            }
        };
        assert!(status.success());
        assert!(matches!(pty.inner.try_reap(), Reap::Taken));

        // Teardown finds no child to kill, so it records no status of its own
        pty.close().unwrap();
        assert!(pty.inner.status.lock().is_none());
    }

    #[test]
    fn test_zero_chunk_rejected_before_allocation() {
        let config = PtyConfig {
            input_chunk: 0,
            ..PtyConfig::default()
        };
        let err = Pty::spawn_with(PtyCommand::new("cat"), config).unwrap_err();
        assert!(matches!(err, PtyError::ZeroConfigValue("input_chunk")));
    }

    #[test]
    fn test_detect_size_never_empty() {
        let size = detect_size(WindowSize::new(24, 80));
        assert!(!size.is_empty());
    }

    #[test]
    fn test_prepare_reader_input() {
        let (guard, source) =
            prepare_input(Some(Input::reader(io::empty())), &PtyConfig::default()).unwrap();
        assert!(guard.is_none());
        assert!(source.is_some());
    }

    #[test]
    fn test_prepare_file_input_sets_nonblocking() {
        use crate::sys::get_flags;
        use nix::fcntl::OFlag;

        let file = tempfile::tempfile().unwrap();
        let probe = file.try_clone().unwrap();
        let (guard, _source) =
            prepare_input(Some(Input::File(file)), &PtyConfig::default()).unwrap();
        assert!(get_flags(probe.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
        guard.unwrap().restore().unwrap();
        assert!(!get_flags(probe.as_fd()).unwrap().contains(OFlag::O_NONBLOCK));
    }
}
