use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::NodeError;

/// Watches a node's output log for markers.
///
/// The node never answers on its control channel, so the log is the only
/// place a command can be seen taking effect.
#[derive(Debug, Clone)]
pub struct LogProbe {
    path: PathBuf,
    poll_interval: Duration,
}

impl LogProbe {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Occurrences of `marker` in the log so far. A log that does not exist
    /// yet counts as empty.
    pub async fn count(&self, marker: &str) -> usize {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).matches(marker).count(),
            Err(_) => 0,
        }
    }

    /// Waits until `marker` has appeared at least `target` times.
    pub async fn wait_for_count(
        &self,
        marker: &str,
        target: usize,
        limit: Duration,
    ) -> Result<usize, NodeError> {
        let polled = timeout(limit, async {
            loop {
                let seen = self.count(marker).await;
                if seen >= target {
                    return seen;
                }
                sleep(self.poll_interval).await;
            }
        })
        .await;

        polled.map_err(|_| NodeError::ReadinessTimeout {
            marker: marker.to_string(),
            log: self.path.clone(),
            waited: limit,
        })
    }
}
