//! 本机进程执行
//!
//! 工具直接运行在控制面主机上时使用，命令以子进程方式启动。

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::NodeHandle;
use crate::error::LaunchError;
use crate::execution::CommandOutcome;

/// 本机节点
pub struct LocalNode {
    name: String,
}

impl LocalNode {
    pub fn new() -> Self {
        Self::with_name("localhost")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LocalNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeHandle for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        path: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome, LaunchError> {
        let start_time = Instant::now();

        debug!(
            node = %self.name,
            command = %super::shell_join(path, args),
            timeout_secs = timeout.as_secs(),
            "Executing local command"
        );

        let child = Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 超时后丢弃 future 时终止子进程
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::new(&self.name, format!("failed to spawn {}: {}", path, e)))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let duration_secs = start_time.elapsed().as_secs_f64();
                debug!(
                    node = %self.name,
                    exit_code = ?output.status.code(),
                    duration_secs = duration_secs,
                    "Local command finished"
                );
                Ok(CommandOutcome::completed(
                    output.status.code(),
                    String::from_utf8_lossy(&output.stdout).to_string(),
                    String::from_utf8_lossy(&output.stderr).to_string(),
                    duration_secs,
                ))
            }
            Ok(Err(e)) => Err(LaunchError::new(
                &self.name,
                format!("failed to collect output of {}: {}", path, e),
            )),
            Err(_) => {
                warn!(node = %self.name, timeout = ?timeout, "Local command timed out");
                Ok(CommandOutcome::timeout(start_time.elapsed().as_secs_f64()))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_local_success() {
        let node = LocalNode::new();
        let outcome = node
            .execute("sh", &args(&["-c", "echo hello"]), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_local_non_zero_exit() {
        let node = LocalNode::new();
        let outcome = node
            .execute("sh", &args(&["-c", "echo oops >&2; exit 3"]), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stderr.trim(), "oops");
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let node = LocalNode::new();
        let outcome = node
            .execute("sleep", &args(&["5"]), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.duration_secs < 5.0);
    }

    #[tokio::test]
    async fn test_local_launch_error() {
        let node = LocalNode::with_name("cp-0");
        let result = node
            .execute("/nonexistent/kubectl", &[], Duration::from_secs(1))
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.node, "cp-0");
        assert!(err.message.contains("/nonexistent/kubectl"));
    }
}
