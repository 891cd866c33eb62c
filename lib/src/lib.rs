// Shared vocabulary for the ring harness: identifiers, the node control
// protocol and the harness configuration.
pub mod config;
pub mod control;
pub mod identity;

pub use config::{ConfigError, HarnessConfig, NodeTimers, Pacing, Readiness, ReadinessMode};
pub use control::{ControlCommand, DOWNLOAD_DIR};
pub use identity::{assign, assign_in, endpoint, RingId, RING_SIZE};
