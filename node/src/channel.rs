use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

/// Write side of a node's control channel.
///
/// Implementations must flush after every line: the node reads commands
/// interactively and nothing is acknowledged on this channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandChannel: Send + 'static {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// Control channel backed by the child's standard input.
pub struct StdinChannel {
    stdin: ChildStdin,
}

impl StdinChannel {
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }
}

#[async_trait]
impl CommandChannel for StdinChannel {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }
}
