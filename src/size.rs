//! Window size for PTY

use std::os::fd::BorrowedFd;

use nix::libc;
use serde::{Deserialize, Serialize};

use crate::error::{PtyError, PtyResult};
use crate::sys::ioctl;

/// Window size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    /// Number of rows (characters)
    pub rows: u16,
    /// Number of columns (characters)
    pub cols: u16,
}

impl WindowSize {
    /// Create a new window size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Whether either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Convert to libc winsize structure
    ///
    /// The pixel fields are reserved and always zero.
    pub fn to_winsize(&self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
        }
    }
}

/// Set the window size on a terminal descriptor
pub fn set_window_size(fd: BorrowedFd<'_>, size: WindowSize) -> PtyResult<()> {
    let mut ws = size.to_winsize();
    // SAFETY: TIOCSWINSZ reads a winsize
    unsafe { ioctl(fd, libc::TIOCSWINSZ as u64, &mut ws) }.map_err(PtyError::WindowSize)
}

/// Get the window size of a terminal descriptor
pub fn get_window_size(fd: BorrowedFd<'_>) -> PtyResult<WindowSize> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ fills a winsize
    unsafe { ioctl(fd, libc::TIOCGWINSZ as u64, &mut ws) }.map_err(PtyError::WindowSize)?;
    Ok(WindowSize::from(ws))
}
