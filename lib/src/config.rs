//! Harness configuration.
//!
//! Defaults reproduce the pacing the ring needs on a developer machine.
//! A JSON file named by `RINGCHECK_CONFIG` replaces the defaults, and the
//! individual `RINGCHECK_*` variables override single fields on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "RINGCHECK_CONFIG";

const TIMER_RANGE_MS: (u64, u64) = (1, 60_000);
const SUCCESSOR_RANGE: (u32, u32) = (1, 32);
const MIN_PORT_EXCLUSIVE: u16 = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Intervals handed to every node executable on its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeTimers {
    #[serde(with = "humantime_serde")]
    pub stabilize: Duration,
    #[serde(with = "humantime_serde")]
    pub fix_fingers: Duration,
    #[serde(with = "humantime_serde")]
    pub check_predecessor: Duration,
    /// Successor-list length, which is also the replication factor.
    pub successors: u32,
}

impl Default for NodeTimers {
    fn default() -> Self {
        Self {
            stabilize: Duration::from_millis(3000),
            fix_fingers: Duration::from_millis(1000),
            check_predecessor: Duration::from_millis(3000),
            successors: 4,
        }
    }
}

impl NodeTimers {
    /// Flags in the form the node executable parses them.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--ts".to_string(),
            self.stabilize.as_millis().to_string(),
            "--tff".to_string(),
            self.fix_fingers.as_millis().to_string(),
            "--tcp".to_string(),
            self.check_predecessor.as_millis().to_string(),
            "-r".to_string(),
            self.successors.to_string(),
        ]
    }
}

/// Fixed delays between scenario steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    /// After the bootstrap node starts, before anyone joins.
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,
    /// Between two joins in the randomized topology.
    #[serde(with = "humantime_serde")]
    pub join_stagger: Duration,
    /// After the last join, before any workload.
    #[serde(with = "humantime_serde")]
    pub convergence: Duration,
    /// After a store or get command.
    #[serde(with = "humantime_serde")]
    pub command_settle: Duration,
    /// Between a command token and its argument line in fixed mode.
    #[serde(with = "humantime_serde")]
    pub argument_delay: Duration,
    /// Between the last joined node quitting and the bootstrap node quitting.
    #[serde(with = "humantime_serde")]
    pub teardown_grace: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(10),
            join_stagger: Duration::from_secs(10),
            convergence: Duration::from_secs(50),
            command_settle: Duration::from_secs(10),
            argument_delay: Duration::from_secs(1),
            teardown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// Sleep-based synchronization only.
    Fixed,
    /// Watch the node's log for prompts and markers, bounded by timeouts.
    Log,
}

impl std::str::FromStr for ReadinessMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(ReadinessMode::Fixed),
            "log" => Ok(ReadinessMode::Log),
            other => Err(ConfigError::Invalid {
                field: "readiness.mode",
                reason: format!("expected `fixed` or `log`, got `{}`", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Readiness {
    pub mode: ReadinessMode,
    /// Upper bound for a node to print an argument prompt.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Upper bound for a node to answer the PRINTSTATE liveness probe.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Upper bound for the downloaded artifact to appear.
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    /// Upper bound for a node process to exit after QUIT.
    #[serde(with = "humantime_serde")]
    pub quit_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::Log,
            command_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(10),
            quit_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Externally built node executable, copied into every working directory.
    pub node_binary: PathBuf,
    /// Parent of the per-node `node_<port>` working directories.
    pub work_root: PathBuf,
    pub host: String,
    pub start_port: u16,
    pub nodes_per_scenario: usize,
    /// Each repetition runs one randomized-join and one sequential scenario.
    pub repetitions: usize,
    pub timers: NodeTimers,
    pub pacing: Pacing,
    pub readiness: Readiness,
    /// Terminate the whole run on the first content-verification failure.
    pub fail_fast: bool,
    /// Dump every node's state after the topology settles.
    pub print_state: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("./chord"),
            work_root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            start_port: 4170,
            nodes_per_scenario: 10,
            repetitions: 3,
            timers: NodeTimers::default(),
            pacing: Pacing::default(),
            readiness: Readiness::default(),
            fail_fast: false,
            print_state: true,
        }
    }
}

impl HarnessConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("RINGCHECK_NODE_BINARY") {
            self.node_binary = PathBuf::from(value);
        }
        if let Some(value) = lookup("RINGCHECK_WORK_ROOT") {
            self.work_root = PathBuf::from(value);
        }
        if let Some(value) = lookup("RINGCHECK_START_PORT") {
            self.start_port = parse_field("start_port", &value)?;
        }
        if let Some(value) = lookup("RINGCHECK_NODES") {
            self.nodes_per_scenario = parse_field("nodes_per_scenario", &value)?;
        }
        if let Some(value) = lookup("RINGCHECK_REPETITIONS") {
            self.repetitions = parse_field("repetitions", &value)?;
        }
        if let Some(value) = lookup("RINGCHECK_READINESS") {
            self.readiness.mode = value.parse()?;
        }
        if let Some(value) = lookup("RINGCHECK_FAIL_FAST") {
            self.fail_fast = parse_field("fail_fast", &value)?;
        }
        Ok(())
    }

    /// Checks values against the ranges the node executable accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes_per_scenario == 0 {
            return Err(invalid("nodes_per_scenario", "at least one node is required"));
        }
        if self.start_port <= MIN_PORT_EXCLUSIVE {
            return Err(invalid(
                "start_port",
                format!("must be above {}", MIN_PORT_EXCLUSIVE),
            ));
        }
        let last_port = self.last_port();
        if last_port > u64::from(u16::MAX) {
            return Err(invalid(
                "start_port",
                format!("battery needs ports up to {}, beyond 65535", last_port),
            ));
        }

        for (field, timer) in [
            ("timers.stabilize", self.timers.stabilize),
            ("timers.fix_fingers", self.timers.fix_fingers),
            ("timers.check_predecessor", self.timers.check_predecessor),
        ] {
            let ms = timer.as_millis();
            if ms < u128::from(TIMER_RANGE_MS.0) || ms > u128::from(TIMER_RANGE_MS.1) {
                return Err(invalid(
                    field,
                    format!(
                        "{}ms is outside [{}, {}] ms",
                        ms, TIMER_RANGE_MS.0, TIMER_RANGE_MS.1
                    ),
                ));
            }
        }

        let successors = self.timers.successors;
        if successors < SUCCESSOR_RANGE.0 || successors > SUCCESSOR_RANGE.1 {
            return Err(invalid(
                "timers.successors",
                format!(
                    "{} is outside [{}, {}]",
                    successors, SUCCESSOR_RANGE.0, SUCCESSOR_RANGE.1
                ),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        Ok(())
    }

    /// Ports consumed by one scenario, including the spare port that
    /// separates it from the next one.
    pub fn ports_per_scenario(&self) -> usize {
        self.nodes_per_scenario + 1
    }

    /// Number of scenarios in the battery.
    pub fn scenario_count(&self) -> usize {
        self.repetitions * 2
    }

    /// Highest port the battery binds.
    fn last_port(&self) -> u64 {
        let span = (self.scenario_count() * self.ports_per_scenario()) as u64;
        u64::from(self.start_port) + span.saturating_sub(2)
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, format!("`{}`: {}", value, e)))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
