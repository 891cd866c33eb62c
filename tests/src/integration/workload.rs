use crate::integration::test_harness::expected_content;
use crate::integration::{ScenarioFailure, Stage, TestHarness, TimingController};
use rand::Rng;
use ringcheck_lib::ReadinessMode;
use ringcheck_node::{NodeError, NodeHandle};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Nodes picked for one store/retrieve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadCycle {
    pub store_node: usize,
    pub get_node: usize,
}

impl WorkloadCycle {
    /// Two independent uniform picks; both may be the same node.
    pub fn choose<R: Rng>(count: usize, rng: &mut R) -> Self {
        let count = count.max(1);
        Self {
            store_node: rng.gen_range(0..count),
            get_node: rng.gen_range(0..count),
        }
    }
}

fn missing_node(scenario: &str, index: usize, stage: Stage) -> ScenarioFailure {
    ScenarioFailure::Node {
        node: format!("node{}", index),
        stage,
        source: NodeError::NotSpawned(format!("{} has no node{}", scenario, index)),
    }
}

/// Has node `index` put its copy of the scenario file into the ring.
pub async fn store_file(
    harness: &mut TestHarness,
    index: usize,
    file_name: &str,
) -> Result<(), ScenarioFailure> {
    let settle = harness.config().pacing.command_settle;
    let mode = harness.config().readiness.mode;
    let timing = harness.timing().clone();
    let scenario = harness.scenario().to_string();
    let node = harness
        .node_mut(index)
        .ok_or_else(|| missing_node(&scenario, index, Stage::Store))?;

    node.store_file(file_name)
        .await
        .map_err(|e| ScenarioFailure::from_node(node.name(), Stage::Store, e))?;

    if mode == ReadinessMode::Fixed {
        timing.sleep(settle).await;
    }
    Ok(())
}

/// Has node `index` fetch the scenario file into its download directory.
pub async fn retrieve_file(
    harness: &mut TestHarness,
    index: usize,
    file_name: &str,
) -> Result<(), ScenarioFailure> {
    let settle = harness.config().pacing.command_settle;
    let mode = harness.config().readiness.mode;
    let timing = harness.timing().clone();
    let scenario = harness.scenario().to_string();
    let node = harness
        .node_mut(index)
        .ok_or_else(|| missing_node(&scenario, index, Stage::Retrieve))?;

    node.get_file(file_name)
        .await
        .map_err(|e| ScenarioFailure::from_node(node.name(), Stage::Retrieve, e))?;

    if mode == ReadinessMode::Fixed {
        timing.sleep(settle).await;
    }
    Ok(())
}

async fn read_download(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            log::debug!("Could not read {:?}: {}", path, e);
            None
        }
    }
}

/// Compares `node`'s downloaded copy of `file_name` byte for byte with
/// `expected`.
///
/// With a non-zero `patience` the download is polled for until it matches
/// or the time runs out; the final read decides the outcome. The returned
/// future does not borrow `node`.
pub fn verify_download<'a>(
    node: &NodeHandle,
    file_name: &str,
    expected: &'a str,
    timing: &TimingController,
    poll: Duration,
    patience: Duration,
) -> impl Future<Output = Result<(), ScenarioFailure>> + Send + 'a {
    check_download(
        node.label(),
        node.download_path(file_name),
        expected,
        timing.clone(),
        poll,
        patience,
    )
}

async fn check_download(
    node: String,
    path: PathBuf,
    expected: &str,
    timing: TimingController,
    poll: Duration,
    patience: Duration,
) -> Result<(), ScenarioFailure> {
    if !patience.is_zero() {
        let path = &path;
        let matched = timing
            .wait_for_condition(
                move || async move {
                    read_download(path).await.as_deref() == Some(expected.as_bytes())
                },
                poll,
                patience,
            )
            .await;
        if matched.is_ok() {
            return Ok(());
        }
    }

    match read_download(&path).await {
        None => Err(ScenarioFailure::DownloadMissing { node, path }),
        Some(actual) if actual == expected.as_bytes() => Ok(()),
        Some(actual) => Err(ScenarioFailure::ContentMismatch {
            node,
            path,
            expected: expected.to_string(),
            actual: String::from_utf8_lossy(&actual).into_owned(),
        }),
    }
}

/// One store/retrieve/verify cycle: `store_node` stores its copy of the
/// scenario file, `get_node` fetches it, and the fetched bytes must be
/// exactly what `store_node` wrote.
pub async fn run_cycle(
    harness: &mut TestHarness,
    cycle: WorkloadCycle,
) -> Result<(), ScenarioFailure> {
    let file_name = harness.file_name().to_string();
    let scenario = harness.scenario().to_string();

    scenario_info!(
        scenario,
        "Storing {} via node{}, retrieving via node{}",
        file_name,
        cycle.store_node,
        cycle.get_node
    );
    store_file(harness, cycle.store_node, &file_name).await?;
    retrieve_file(harness, cycle.get_node, &file_name).await?;

    let readiness = harness.config().readiness.clone();
    let patience = match readiness.mode {
        ReadinessMode::Log => readiness.download_timeout,
        ReadinessMode::Fixed => Duration::ZERO,
    };
    let expected = expected_content(cycle.store_node);
    let verification = {
        let timing = harness.timing();
        let node = harness
            .node(cycle.get_node)
            .ok_or_else(|| missing_node(&scenario, cycle.get_node, Stage::Verify))?;
        verify_download(
            node,
            &file_name,
            &expected,
            timing,
            readiness.poll_interval,
            patience,
        )
    };
    verification.await?;

    scenario_info!(
        scenario,
        "node{} got the file node{} stored",
        cycle.get_node,
        cycle.store_node
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use ringcheck_lib::DOWNLOAD_DIR;

    fn node_in(root: &Path) -> NodeHandle {
        let binary = root.join("chord");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();
        NodeHandle::prepare(root.join("node_4171"), "node1", "127.0.0.1", 4171, &binary).unwrap()
    }

    fn write_download(node: &NodeHandle, name: &str, content: &str) {
        let dir = node.work_dir().join(DOWNLOAD_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_choose_in_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let cycle = WorkloadCycle::choose(10, &mut rng);
            assert!(cycle.store_node < 10);
            assert!(cycle.get_node < 10);
        }
        assert_eq!(
            WorkloadCycle::choose(1, &mut rng),
            WorkloadCycle {
                store_node: 0,
                get_node: 0
            }
        );
    }

    #[tokio::test]
    async fn test_verify_exact_match() {
        let root = tempfile::tempdir().unwrap();
        let node = node_in(root.path());
        write_download(&node, "file_1.txt", "This is file.txt from node4");

        let result = verify_download(
            &node,
            "file_1.txt",
            "This is file.txt from node4",
            &TimingController::new(),
            Duration::from_millis(5),
            Duration::ZERO,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_verify_missing() {
        let root = tempfile::tempdir().unwrap();
        let node = node_in(root.path());

        let result = verify_download(
            &node,
            "file_1.txt",
            "anything",
            &TimingController::new(),
            Duration::from_millis(5),
            Duration::from_millis(30),
        )
        .await;
        assert!(matches!(result, Err(ScenarioFailure::DownloadMissing { .. })));
    }

    #[tokio::test]
    async fn test_verify_trailing_newline_is_a_mismatch() {
        let root = tempfile::tempdir().unwrap();
        let node = node_in(root.path());
        write_download(&node, "file_1.txt", "This is file.txt from node4\n");

        let result = verify_download(
            &node,
            "file_1.txt",
            "This is file.txt from node4",
            &TimingController::new(),
            Duration::from_millis(5),
            Duration::ZERO,
        )
        .await;
        match result {
            Err(ScenarioFailure::ContentMismatch { actual, .. }) => {
                assert_eq!(actual, "This is file.txt from node4\n")
            }
            other => panic!("expected a mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_waits_for_late_download() {
        let root = tempfile::tempdir().unwrap();
        let node = node_in(root.path());
        let dir = node.work_dir().join(DOWNLOAD_DIR);

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join("file_1.txt"), "late").await.unwrap();
        });

        let result = verify_download(
            &node,
            "file_1.txt",
            "late",
            &TimingController::new(),
            Duration::from_millis(5),
            Duration::from_secs(5),
        )
        .await;
        writer.await.unwrap();
        assert!(result.is_ok());
    }
}
