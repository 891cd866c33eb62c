use log::{debug, info, warn};
use ringcheck_lib::identity::{self, RingId};
use ringcheck_lib::{ControlCommand, HarnessConfig, NodeTimers, ReadinessMode, DOWNLOAD_DIR};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::{sleep, timeout};

use crate::channel::{CommandChannel, StdinChannel};
use crate::log_probe::LogProbe;
use crate::spawner::{self, LaunchSpec, RingEntry};
use crate::NodeError;

macro_rules! log_info {
    ($node:expr, $($arg:tt)*) => ({
        info!("[{}] {}", $node.label(), format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($node:expr, $($arg:tt)*) => ({
        warn!("[{}] {}", $node.label(), format_args!($($arg)*));
    })
}

/// How a handle synchronizes with its node when talking over the control
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacing {
    pub mode: ReadinessMode,
    /// Fixed-mode pause between a token and its argument line.
    pub argument_delay: Duration,
    /// Log-mode bound on waiting for an argument prompt.
    pub command_timeout: Duration,
    /// Bound on waiting for the PRINTSTATE echo.
    pub probe_timeout: Duration,
    pub quit_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CommandPacing {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl CommandPacing {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            mode: config.readiness.mode,
            argument_delay: config.pacing.argument_delay,
            command_timeout: config.readiness.command_timeout,
            probe_timeout: config.readiness.probe_timeout,
            quit_timeout: config.readiness.quit_timeout,
            poll_interval: config.readiness.poll_interval,
        }
    }
}

fn setup_error(path: &Path) -> impl FnOnce(std::io::Error) -> NodeError {
    let path = path.to_path_buf();
    move |source| NodeError::Setup { path, source }
}

/// One external ring participant.
///
/// The handle owns the node's working directory, its process and the write
/// side of its control channel. The working directory is left in place
/// after the process exits.
pub struct NodeHandle {
    work_dir: PathBuf,
    name: String,
    host: String,
    port: u16,
    id: RingId,
    executable: PathBuf,
    log_path: PathBuf,
    pacing: CommandPacing,
    process: Option<Child>,
    channel: Option<Box<dyn CommandChannel>>,
    channel_faults: usize,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .field("id", &self.id)
            .field("work_dir", &self.work_dir)
            .field("running", &self.process.is_some())
            .finish()
    }
}

impl NodeHandle {
    /// Sets up a fresh working directory for a node and copies the node
    /// executable into it.
    ///
    /// Any existing directory at `work_dir` is removed first.
    pub fn prepare(
        work_dir: impl AsRef<Path>,
        name: &str,
        host: &str,
        port: u16,
        node_binary: &Path,
    ) -> Result<Self, NodeError> {
        let requested = work_dir.as_ref();

        if requested.exists() {
            std::fs::remove_dir_all(requested).map_err(setup_error(requested))?;
        }
        std::fs::create_dir_all(requested).map_err(setup_error(requested))?;
        let work_dir = std::fs::canonicalize(requested).map_err(setup_error(requested))?;

        let file_name = node_binary
            .file_name()
            .map(|f| f.to_os_string())
            .ok_or_else(|| NodeError::Setup {
                path: node_binary.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "node executable path has no file name",
                ),
            })?;
        let executable = work_dir.join(file_name);
        std::fs::copy(node_binary, &executable).map_err(setup_error(node_binary))?;

        let log_path = work_dir.join(format!("{}_output.log", name));
        let id = identity::assign(&identity::endpoint(host, port));

        Ok(Self {
            work_dir,
            name: name.to_string(),
            host: host.to_string(),
            port,
            id,
            executable,
            log_path,
            pacing: CommandPacing::default(),
            process: None,
            channel: None,
            channel_faults: 0,
        })
    }

    pub fn with_pacing(mut self, pacing: CommandPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn id(&self) -> RingId {
        self.id
    }

    pub fn endpoint(&self) -> String {
        identity::endpoint(&self.host, self.port)
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn download_path(&self, file_name: &str) -> PathBuf {
        self.work_dir.join(DOWNLOAD_DIR).join(file_name)
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Writes that failed because the node stopped reading its input.
    pub fn channel_faults(&self) -> usize {
        self.channel_faults
    }

    pub fn log_probe(&self) -> LogProbe {
        LogProbe::new(&self.log_path, self.pacing.poll_interval)
    }

    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.endpoint())
    }

    /// Writes a file into the node's working directory.
    pub fn create_file(&self, file_name: &str, content: &str) -> Result<PathBuf, NodeError> {
        let path = self.work_dir.join(file_name);
        std::fs::write(&path, content).map_err(|source| NodeError::Setup {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Starts the node as the first member of a new ring.
    ///
    /// Returns as soon as the process is running; the caller decides how
    /// long to give it before anyone joins.
    pub fn bootstrap_new_ring(&mut self, timers: &NodeTimers) -> Result<(), NodeError> {
        self.launch(RingEntry::Create, timers)
    }

    /// Starts the node and has it join the ring through `host:port`.
    pub fn join_ring(
        &mut self,
        host: &str,
        port: u16,
        timers: &NodeTimers,
    ) -> Result<(), NodeError> {
        let entry = RingEntry::Join {
            host: host.to_string(),
            port,
        };
        self.launch(entry, timers)
    }

    fn launch(&mut self, entry: RingEntry, timers: &NodeTimers) -> Result<(), NodeError> {
        if self.process.is_some() {
            return Err(NodeError::AlreadySpawned(self.label()));
        }

        let spec = LaunchSpec {
            program: self.executable.clone(),
            args: spawner::launch_args(&self.host, self.port, &entry, timers),
            cwd: self.work_dir.clone(),
            log_path: self.log_path.clone(),
        };
        let mut child = spawner::spawn(&spec)?;
        let stdin = child.stdin.take().ok_or_else(|| NodeError::Io {
            node: self.label(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin was not piped"),
        })?;

        let digest = identity::endpoint_digest_hex(&self.endpoint());
        match &entry {
            RingEntry::Create => {
                log_info!(self, "Started node {} ({}) creating a new ring", self.id, digest)
            }
            RingEntry::Join { host, port } => log_info!(
                self,
                "Started node {} ({}) joining through {}:{}",
                self.id,
                digest,
                host,
                port
            ),
        }

        self.process = Some(child);
        self.channel = Some(Box::new(StdinChannel::new(stdin)));
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn attach_channel(&mut self, channel: Box<dyn CommandChannel>) {
        self.channel = Some(channel);
    }

    /// Writes one line to the control channel. A failed write is logged and
    /// counted, never returned.
    async fn write_line(&mut self, line: &str) -> bool {
        let label = self.label();
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        match channel.write_line(line).await {
            Ok(()) => true,
            Err(e) => {
                self.channel_faults += 1;
                warn!("[{}] Control channel write failed: {}", label, e);
                false
            }
        }
    }

    /// Sends a command token and, if the command carries one, its argument.
    ///
    /// In fixed mode the argument follows after `argument_delay`. In log mode
    /// it follows once the node has printed the command's argument prompt,
    /// which must happen within `command_timeout`.
    pub async fn send_command(&mut self, command: &ControlCommand) -> Result<(), NodeError> {
        if self.channel.is_none() {
            return Err(NodeError::NotSpawned(self.label()));
        }

        let probe = self.log_probe();
        let prompt = command.argument_prompt();
        let prompts_before = match (self.pacing.mode, prompt) {
            (ReadinessMode::Log, Some(prompt)) => probe.count(prompt).await,
            _ => 0,
        };

        if !self.write_line(&command.token_line()).await {
            return Ok(());
        }

        if let Some(argument) = command.argument_line() {
            match (self.pacing.mode, prompt) {
                (ReadinessMode::Log, Some(prompt)) => {
                    probe
                        .wait_for_count(prompt, prompts_before + 1, self.pacing.command_timeout)
                        .await?;
                }
                _ => sleep(self.pacing.argument_delay).await,
            }
            self.write_line(&argument).await;
        }

        debug!("[{}] Sent {}", self.label(), command);
        Ok(())
    }

    pub async fn print_state(&mut self) -> Result<(), NodeError> {
        self.send_command(&ControlCommand::PrintState).await
    }

    /// Sends PRINTSTATE and checks the node took it.
    ///
    /// Fails if the write hit a closed channel or, in log mode, if the node
    /// does not echo the command within `probe_timeout`.
    pub async fn print_state_acknowledged(&mut self) -> Result<(), NodeError> {
        let command = ControlCommand::PrintState;
        let marker = command.echo_marker();
        let probe = self.log_probe();
        let echoes_before = probe.count(&marker).await;
        let faults_before = self.channel_faults;

        self.send_command(&command).await?;
        if self.channel_faults > faults_before {
            return Err(NodeError::ChannelClosed(self.label()));
        }

        if self.pacing.mode == ReadinessMode::Log {
            probe
                .wait_for_count(&marker, echoes_before + 1, self.pacing.probe_timeout)
                .await?;
        }
        Ok(())
    }

    /// Stores a file into the ring through this node.
    pub async fn store_file(&mut self, path: &str) -> Result<(), NodeError> {
        self.run_file_command(ControlCommand::StoreFile(path.to_string()))
            .await?;
        log_info!(self, "Stored file {}", path);
        Ok(())
    }

    /// Fetches a file from the ring into this node's download directory.
    pub async fn get_file(&mut self, path: &str) -> Result<(), NodeError> {
        self.run_file_command(ControlCommand::GetFile(path.to_string()))
            .await?;
        log_info!(self, "Got file {}", path);
        Ok(())
    }

    /// In log mode, also waits for the node to report the command finished.
    async fn run_file_command(&mut self, command: ControlCommand) -> Result<(), NodeError> {
        let probe = self.log_probe();
        let marker = match self.pacing.mode {
            ReadinessMode::Log => command.completion_marker(),
            ReadinessMode::Fixed => None,
        };
        let before = match &marker {
            Some(marker) => probe.count(marker).await,
            None => 0,
        };
        let faults_before = self.channel_faults;

        self.send_command(&command).await?;

        // Nothing will be reported for a command the node never received.
        if let Some(marker) = marker {
            if self.channel_faults == faults_before {
                probe
                    .wait_for_count(&marker, before + 1, self.pacing.command_timeout)
                    .await?;
            }
        }
        Ok(())
    }

    /// Asks the node to leave the ring and blocks until its process exits.
    ///
    /// A node still running after `quit_timeout` is killed and reported as
    /// `QuitTimeout`.
    pub async fn quit(&mut self) -> Result<ExitStatus, NodeError> {
        if self.process.is_none() {
            return Err(NodeError::NotSpawned(self.label()));
        }

        self.send_command(&ControlCommand::Quit).await?;
        // Closing stdin as well gives the node EOF should it miss the token.
        self.channel = None;

        let Some(mut child) = self.process.take() else {
            return Err(NodeError::NotSpawned(self.label()));
        };
        let waited = self.pacing.quit_timeout;

        match timeout(waited, child.wait()).await {
            Ok(Ok(status)) => {
                log_info!(self, "Node exited with {}", status);
                Ok(status)
            }
            Ok(Err(source)) => Err(NodeError::Io {
                node: self.label(),
                source,
            }),
            Err(_) => {
                log_warn!(self, "Node still running {:?} after QUIT, killing it", waited);
                if let Err(e) = child.kill().await {
                    log_warn!(self, "Kill failed: {}", e);
                }
                Err(NodeError::QuitTimeout {
                    node: self.label(),
                    waited,
                })
            }
        }
    }
}
