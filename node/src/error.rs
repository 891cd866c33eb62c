use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a [`crate::NodeHandle`].
///
/// Writes to a closed input channel are not in here: they are logged and
/// counted on the handle instead.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to prepare {path:?}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("node {0} has not been spawned")]
    NotSpawned(String),

    #[error("node {0} is already running")]
    AlreadySpawned(String),

    #[error("node {0} no longer accepts commands")]
    ChannelClosed(String),

    #[error("timed out after {waited:?} waiting for `{marker}` in {log:?}")]
    ReadinessTimeout {
        marker: String,
        log: PathBuf,
        waited: Duration,
    },

    #[error("node {node} did not exit within {waited:?} after QUIT")]
    QuitTimeout { node: String, waited: Duration },

    #[error("i/o error on node {node}: {source}")]
    Io {
        node: String,
        #[source]
        source: std::io::Error,
    },
}
