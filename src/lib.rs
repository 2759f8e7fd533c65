//! pty-relay: run a child process on its own pseudoterminal
//!
//! This crate allocates a pty pair, attaches a child process to the slave
//! side and relays bytes between the master and a caller-supplied input and
//! output while the caller's own terminal sits in raw mode.
//!
//! - `pty`: platform allocators for the master/slave pair
//! - `term`: raw mode and descriptor flag save/restore
//! - `child`: command description and slave attachment
//! - `pump`: background byte pumps and their shutdown signal
//! - `handle`: the [`Pty`] handle tying it all together
//!
//! It moves bytes and window sizes only; escape sequences are not
//! interpreted.
//!
//! ```no_run
//! use pty_relay::{Input, Pty, PtyCommand};
//!
//! let pty = Pty::spawn(PtyCommand::new("sh").stdin(Input::Stdin).stdout(std::io::stdout()))?;
//! let status = pty.wait().recv().expect("wait thread vanished")?;
//! println!("exited: {status}");
//! # Ok::<(), pty_relay::PtyError>(())
//! ```

mod child;
mod config;
mod error;
mod handle;
pub mod pty;
mod pump;
mod size;
mod sys;
mod term;

pub use child::{Input, PtyCommand};
pub use config::PtyConfig;
pub use error::{ErrorKind, PtyError, PtyResult};
pub use handle::{LifecycleState, Pty};
pub use pty::{NativeAllocator, PosixAllocator, PtyAllocator, PtyPair};
pub use size::{get_window_size, set_window_size, WindowSize};
pub use term::{enter_raw, restore};
