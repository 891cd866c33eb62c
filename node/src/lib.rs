//! Ringcheck node controller
//!
//! Drives one external ring node process: working directory, lifecycle and
//! the line-oriented control protocol on its standard input. The node's
//! log and download directory are the only things read back.

pub mod channel;
pub mod error;
pub mod log_probe;
pub mod node;
pub mod spawner;

pub use channel::{CommandChannel, StdinChannel};
pub use error::NodeError;
pub use log_probe::LogProbe;
pub use node::{CommandPacing, NodeHandle};
pub use spawner::{LaunchSpec, RingEntry};

// Re-export from lib crate for convenience
pub use ringcheck_lib::{ControlCommand, NodeTimers, RingId};
