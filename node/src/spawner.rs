//! Launching node executables.
//!
//! Builds the command line the node expects and starts it with its output
//! captured in a log file and its input left open as the control channel.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use ringcheck_lib::NodeTimers;
use tokio::process::{Child, Command};

use crate::NodeError;

/// How a node enters the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingEntry {
    /// Start a brand-new ring.
    Create,
    /// Join the ring that `host:port` is a member of.
    Join { host: String, port: u16 },
}

/// Everything needed to start one node process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub log_path: PathBuf,
}

/// Command-line arguments for a node bound to `host:port`.
pub fn launch_args(host: &str, port: u16, entry: &RingEntry, timers: &NodeTimers) -> Vec<String> {
    let mut args = vec![
        "-a".to_string(),
        host.to_string(),
        "-p".to_string(),
        port.to_string(),
    ];
    if let RingEntry::Join { host, port } = entry {
        args.extend([
            "-ja".to_string(),
            host.clone(),
            "-jp".to_string(),
            port.to_string(),
        ]);
    }
    args.extend(timers.to_args());
    args
}

/// Spawn a node process according to `spec`.
///
/// Standard output and standard error both go to `spec.log_path`, which is
/// truncated first. Standard input is piped and left to the caller.
///
/// # Errors
///
/// Returns `NodeError::Setup` if the log file cannot be created and
/// `NodeError::Spawn` if the process cannot be started.
pub fn spawn(spec: &LaunchSpec) -> Result<Child, NodeError> {
    let stdout = create_log(&spec.log_path)?;
    let stderr = stdout.try_clone().map_err(|source| NodeError::Setup {
        path: spec.log_path.clone(),
        source,
    })?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        // Dropped handles take their process with them.
        .kill_on_drop(true);

    cmd.spawn().map_err(|source| NodeError::Spawn {
        program: spec.program.clone(),
        source,
    })
}

fn create_log(path: &Path) -> Result<File, NodeError> {
    File::create(path).map_err(|source| NodeError::Setup {
        path: path.to_path_buf(),
        source,
    })
}
