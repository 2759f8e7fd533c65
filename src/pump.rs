//! Byte pumps between the pty master and the caller's streams
//!
//! - the output pump copies master -> sink until the master fails or the
//!   shutdown signal is raised
//! - the input pump polls the source and copies source -> master until the
//!   shutdown signal is raised or the master rejects a write
//!
//! Both run on named threads and are joined through [`Pumps::join`].

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::config::PtyConfig;
use crate::error::{PtyError, PtyResult};

/// One-shot shutdown flag shared with the pumps
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    /// A signal that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal; returns true only for the call that raised it
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Whether any call to [`ShutdownSignal::trigger`] has happened
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Completion barrier over the running pumps
#[derive(Debug, Default)]
pub struct Pumps {
    handles: Vec<JoinHandle<()>>,
}

impl Pumps {
    /// Start a pump for each side that is present
    ///
    /// If a thread cannot be spawned, pumps already started are stopped
    /// before the error is returned.
    pub fn start(
        master: &Arc<File>,
        input: Option<Box<dyn Read + Send>>,
        output: Option<Box<dyn Write + Send>>,
        shutdown: &ShutdownSignal,
        config: &PtyConfig,
    ) -> PtyResult<Self> {
        let mut pumps = Pumps::default();

        if let Some(sink) = output {
            let pump = OutputPump {
                master: Arc::clone(master),
                sink,
                shutdown: shutdown.clone(),
                chunk: config.output_chunk,
                poll_interval: config.poll_interval(),
            };
            pumps.spawn("pty-output", move || pump.run(), shutdown)?;
        }

        if let Some(source) = input {
            let pump = InputPump {
                master: Arc::clone(master),
                source,
                shutdown: shutdown.clone(),
                chunk: config.input_chunk,
                poll_interval: config.poll_interval(),
            };
            pumps.spawn("pty-input", move || pump.run(), shutdown)?;
        }

        Ok(pumps)
    }

    fn spawn<F>(&mut self, name: &str, f: F, shutdown: &ShutdownSignal) -> PtyResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                self.handles.push(handle);
                Ok(())
            },
            Err(e) => {
                shutdown.trigger();
                std::mem::take(self).join();
                Err(PtyError::Pump(e))
            },
        }
    }

    /// Number of pumps started
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every pump to exit
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::warn!("pty pump panicked");
            }
        }
    }
}

struct OutputPump {
    master: Arc<File>,
    sink: Box<dyn Write + Send>,
    shutdown: ShutdownSignal,
    chunk: usize,
    poll_interval: Duration,
}

impl OutputPump {
    fn run(mut self) {
        let mut buf = vec![0u8; self.chunk];
        let timeout = poll_timeout(self.poll_interval);

        loop {
            if self.shutdown.is_triggered() {
                self.drain(&mut buf);
                break;
            }
            match poll_readable(&self.master, timeout) {
                Ok(true) => {},
                Ok(false) | Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::trace!("output pump poll failed: {}", e);
                    break;
                },
            }
            if !self.copy_once(&mut buf) {
                break;
            }
        }

        let _ = self.sink.flush();
        tracing::trace!("output pump exited");
    }

    /// Forward whatever is readable right now
    fn drain(&mut self, buf: &mut [u8]) {
        while let Ok(true) = poll_readable(&self.master, 0) {
            if !self.copy_once(buf) {
                break;
            }
        }
    }

    /// Move one chunk; false once the master is gone
    fn copy_once(&mut self, buf: &mut [u8]) -> bool {
        match (&*self.master).read(buf) {
            Ok(0) => false,
            Ok(n) => {
                tracing::trace!(bytes = n, "pty -> sink");
                if let Err(e) = self.sink.write_all(&buf[..n]) {
                    tracing::trace!("output sink rejected write: {}", e);
                }
                true
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                true
            },
            Err(e) => {
                // EIO once every slave descriptor is closed
                tracing::trace!("pty read ended: {}", e);
                false
            },
        }
    }
}

struct InputPump {
    master: Arc<File>,
    source: Box<dyn Read + Send>,
    shutdown: ShutdownSignal,
    chunk: usize,
    poll_interval: Duration,
}

impl InputPump {
    fn run(mut self) {
        let mut buf = vec![0u8; self.chunk];

        while !self.shutdown.is_triggered() {
            let n = match self.source.read(&mut buf) {
                Ok(n) => n,
                // Non-blocking sources report "nothing yet" as an error
                Err(_) => 0,
            };
            if n == 0 {
                thread::sleep(self.poll_interval);
                continue;
            }
            tracing::trace!(bytes = n, "source -> pty");
            if let Err(e) = (&*self.master).write_all(&buf[..n]) {
                tracing::trace!("pty write failed: {}", e);
                break;
            }
        }

        tracing::trace!("input pump exited");
    }
}

/// Interval in poll(2) milliseconds, saturating instead of wrapping negative
fn poll_timeout(interval: Duration) -> i32 {
    i32::try_from(interval.as_millis()).unwrap_or(i32::MAX)
}

/// Wait up to `timeout` ms for the master to become readable (or hung up)
fn poll_readable(master: &File, timeout: i32) -> nix::Result<bool> {
    let fd = master.as_fd();
    let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
    let n = poll(&mut fds, timeout)?;
    Ok(n > 0 && fds[0].revents().is_some_and(|r| !r.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{NativeAllocator, PtyAllocator, PtyPair};
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn split(pair: PtyPair) -> (Arc<File>, File) {
        (Arc::new(File::from(pair.master)), File::from(pair.slave))
    }

    #[test]
    fn test_shutdown_signal_is_one_shot() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.clone().is_triggered());
    }

    #[test]
    fn test_poll_timeout_saturates() {
        assert_eq!(poll_timeout(Duration::from_millis(25)), 25);
        assert_eq!(poll_timeout(Duration::from_millis(u64::MAX)), i32::MAX);
        assert_eq!(poll_timeout(Duration::from_millis(1 << 32)), i32::MAX);
    }

    #[test]
    fn test_no_streams_no_pumps() {
        let (master, _slave) = split(NativeAllocator::default().allocate().unwrap());
        let shutdown = ShutdownSignal::new();
        let pumps = Pumps::start(&master, None, None, &shutdown, &PtyConfig::default()).unwrap();
        assert_eq!(pumps.len(), 0);
        pumps.join();
    }

    #[test]
    fn test_output_pump_forwards_slave_writes() {
        let (master, mut slave) = split(NativeAllocator::default().allocate().unwrap());
        let shutdown = ShutdownSignal::new();
        let sink = SharedBuf::default();
        let pumps = Pumps::start(
            &master,
            None,
            Some(Box::new(sink.clone())),
            &shutdown,
            &PtyConfig::default(),
        )
        .unwrap();
        assert_eq!(pumps.len(), 1);

        slave.write_all(b"hello").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !String::from_utf8_lossy(&sink.0.lock()).contains("hello") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        shutdown.trigger();
        pumps.join();
        assert!(String::from_utf8_lossy(&sink.0.lock()).contains("hello"));
    }

    #[test]
    fn test_input_pump_writes_into_master() {
        let (master, mut slave) = split(NativeAllocator::default().allocate().unwrap());
        let shutdown = ShutdownSignal::new();
        let source = Cursor::new(b"ping\n".to_vec());
        let pumps = Pumps::start(
            &master,
            Some(Box::new(source)),
            None,
            &shutdown,
            &PtyConfig::default(),
        )
        .unwrap();

        // Canonical mode on the slave delivers the whole line at once
        let mut buf = [0u8; 16];
        let n = slave.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping\n");

        shutdown.trigger();
        pumps.join();
    }

    #[test]
    fn test_input_pump_stops_promptly_on_shutdown() {
        let (master, _slave) = split(NativeAllocator::default().allocate().unwrap());
        let shutdown = ShutdownSignal::new();
        let pumps = Pumps::start(
            &master,
            Some(Box::new(io::empty())),
            None,
            &shutdown,
            &PtyConfig::default(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        let started = Instant::now();
        shutdown.trigger();
        pumps.join();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_output_pump_ends_when_slave_closes() {
        let (master, slave) = split(NativeAllocator::default().allocate().unwrap());
        let shutdown = ShutdownSignal::new();
        let pumps = Pumps::start(
            &master,
            None,
            Some(Box::new(io::sink())),
            &shutdown,
            &PtyConfig::default(),
        )
        .unwrap();

        drop(slave);
        // No shutdown signal: the pump must notice the hangup on its own
        pumps.join();
    }
}
