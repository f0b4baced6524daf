//! Docker 容器节点
//!
//! 集群节点以容器形式运行时，通过 Docker Engine API 的 exec 接口在节点内执行命令。
//! 节点发现依赖容器标签：集群名与节点角色。

#![allow(deprecated)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::{
    container::{ListContainersOptions, LogOutput},
    exec::{StartExecOptions, StartExecResults},
    models::{ContainerSummary, ExecConfig},
    Docker,
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::{NodeHandle, NodeInfo, NodeRole};
use crate::error::{AppError, LaunchError};
use crate::execution::CommandOutcome;

/// 集群名标签
pub const CLUSTER_LABEL: &str = "io.x-k8s.kind.cluster";
/// 节点角色标签
pub const ROLE_LABEL: &str = "io.x-k8s.kind.role";

/// Docker 节点发现
pub struct DockerNodeProvider {
    docker: Docker,
}

impl DockerNodeProvider {
    /// 连接本地 Docker 守护进程
    pub fn connect() -> Result<Self, AppError> {
        let docker = Docker::connect_with_local_defaults()?;
        info!("Docker client initialized");
        Ok(Self { docker })
    }

    /// 列出集群中正在运行的节点
    pub async fn list_nodes(&self, cluster: &str) -> Result<Vec<NodeInfo>, AppError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", CLUSTER_LABEL, cluster)],
        );

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                filters,
                ..Default::default()
            }))
            .await?;

        let nodes: Vec<NodeInfo> = containers
            .into_iter()
            .filter_map(node_from_summary)
            .collect();

        debug!(cluster = %cluster, count = nodes.len(), "Discovered cluster nodes");
        Ok(nodes)
    }

    /// 获取指定容器的节点句柄
    pub fn node(&self, container: impl Into<String>) -> DockerNode {
        DockerNode::with_client(self.docker.clone(), container)
    }
}

/// 容器名去掉前导 `/`，角色取自标签
fn node_from_summary(container: ContainerSummary) -> Option<NodeInfo> {
    let name = container
        .names?
        .first()?
        .trim_start_matches('/')
        .to_string();
    let role = container
        .labels
        .as_ref()
        .and_then(|labels| labels.get(ROLE_LABEL))
        .map(|value| NodeRole::from_label(value))
        .unwrap_or(NodeRole::Unknown);
    Some(NodeInfo { name, role })
}

/// 超出 i32 范围的退出码按无退出状态处理
fn exit_status(code: i64) -> Option<i32> {
    i32::try_from(code).ok()
}

/// Docker 容器节点
pub struct DockerNode {
    docker: Docker,
    container: String,
}

impl DockerNode {
    fn with_client(docker: Docker, container: impl Into<String>) -> Self {
        Self {
            docker,
            container: container.into(),
        }
    }

    fn launch_error(&self, message: String) -> LaunchError {
        LaunchError::new(&self.container, message)
    }
}

#[async_trait]
impl NodeHandle for DockerNode {
    fn name(&self) -> &str {
        &self.container
    }

    async fn execute(
        &self,
        path: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome, LaunchError> {
        let start_time = Instant::now();

        debug!(
            container = %self.container,
            command = %super::shell_join(path, args),
            timeout_secs = timeout.as_secs(),
            "Executing command in node container"
        );

        let cmd: Vec<String> = std::iter::once(path.to_string())
            .chain(args.iter().cloned())
            .collect();

        let exec = self
            .docker
            .create_exec(
                &self.container,
                ExecConfig {
                    cmd: Some(cmd),
                    attach_stdin: Some(false),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| self.launch_error(format!("failed to create exec: {}", e)))?;

        let mut output = match self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| self.launch_error(format!("failed to start exec: {}", e)))?
        {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(self.launch_error("exec started detached".to_string()));
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let collect = async {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    _ => {}
                }
            }
            Ok::<(), bollard::errors::Error>(())
        };

        let collected = tokio::time::timeout(timeout, collect).await;
        match collected {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(self.launch_error(format!("exec output stream failed: {}", e)));
            }
            Err(_) => {
                // exec 无法从 API 侧终止，进程会在节点内继续运行到结束
                warn!(
                    container = %self.container,
                    timeout = ?timeout,
                    "Container command timed out"
                );
                return Ok(CommandOutcome::timeout(start_time.elapsed().as_secs_f64()));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| self.launch_error(format!("failed to inspect exec: {}", e)))?;

        let exit_code = inspect.exit_code.and_then(exit_status);
        let duration_secs = start_time.elapsed().as_secs_f64();

        debug!(
            container = %self.container,
            exit_code = ?exit_code,
            duration_secs = duration_secs,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Container command finished"
        );

        Ok(CommandOutcome::completed(
            exit_code,
            String::from_utf8_lossy(&stdout).to_string(),
            String::from_utf8_lossy(&stderr).to_string(),
            duration_secs,
        ))
    }
}
