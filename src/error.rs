//! Error types for PTY operations

use std::io;

use thiserror::Error;

/// Broad category of a [`PtyError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Opening, granting, unlocking or naming the pty pair failed
    Allocation,
    /// Launching the child process failed
    Attachment,
    /// termios, descriptor flag or window size manipulation failed
    Mode,
    /// Reading, writing or waiting failed
    Io,
    /// Closing a descriptor failed
    Close,
    /// The handle is closed or already being waited on
    Lifecycle,
    /// A configuration could not be parsed or holds an unusable value
    Config,
}

/// PTY error type
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] io::Error),

    #[error("Failed to grant PTY access: {0}")]
    Grant(#[source] nix::Error),

    #[error("Failed to unlock PTY: {0}")]
    Unlock(#[source] nix::Error),

    #[error("Failed to get PTY slave name: {0}")]
    SlaveName(#[source] nix::Error),

    #[error("PTY slave name is not NUL terminated")]
    SlaveNameUnterminated,

    #[error("Failed to open PTY slave: {0}")]
    OpenSlave(#[source] io::Error),

    #[error("Failed to spawn child: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to change terminal attributes: {0}")]
    Termios(#[source] nix::Error),

    #[error("Failed to change descriptor flags: {0}")]
    Fcntl(#[source] nix::Error),

    #[error("Failed to access window size: {0}")]
    WindowSize(#[source] nix::Error),

    #[error("Failed to start pump thread: {0}")]
    Pump(#[source] io::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] io::Error),

    #[error("Failed to close PTY descriptor: {0}")]
    Close(#[source] nix::Error),

    #[error("PTY is closed")]
    Closed,

    #[error("Child is already being waited on")]
    WaitInProgress,

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid configuration: {0} must be greater than zero")]
    ZeroConfigValue(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PtyError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PtyError::OpenMaster(_)
            | PtyError::Grant(_)
            | PtyError::Unlock(_)
            | PtyError::SlaveName(_)
            | PtyError::SlaveNameUnterminated
            | PtyError::OpenSlave(_) => ErrorKind::Allocation,
            PtyError::Spawn(_) => ErrorKind::Attachment,
            PtyError::Termios(_) | PtyError::Fcntl(_) | PtyError::WindowSize(_) => ErrorKind::Mode,
            PtyError::Pump(_) | PtyError::Wait(_) | PtyError::Io(_) => ErrorKind::Io,
            PtyError::Close(_) => ErrorKind::Close,
            PtyError::Closed | PtyError::WaitInProgress => ErrorKind::Lifecycle,
            PtyError::Config(_) | PtyError::ZeroConfigValue(_) => ErrorKind::Config,
        }
    }
}

/// Result type for PTY operations
pub type PtyResult<T> = std::result::Result<T, PtyError>;
