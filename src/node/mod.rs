//! 节点执行模块
//!
//! `NodeHandle` 是修复执行器与具体节点之间的接缝：在某个集群节点上执行命令并返回结果。
//! 提供三种实现：Docker 容器节点、SSH 远程主机以及本机进程。

pub mod docker;
pub mod local;
pub mod ssh;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, NodeBackend};
use crate::error::{AppError, LaunchError};
use crate::execution::CommandOutcome;

pub use docker::{DockerNode, DockerNodeProvider};
pub use local::LocalNode;
pub use ssh::{HostKeyVerification, SshAuth, SshConfig, SshNode};

/// 在节点上执行命令的能力
///
/// 非零退出码通过 `CommandOutcome` 返回，不视为错误；
/// 只有执行通道本身不可用时才返回 `LaunchError`。
/// 超时由实现负责，超时结果以 `timed_out` 标记返回。
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// 节点名称（用于日志）
    fn name(&self) -> &str;

    async fn execute(
        &self,
        path: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome, LaunchError>;
}

/// 节点角色
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
    ExternalLoadBalancer,
    Unknown,
}

impl NodeRole {
    /// 从节点角色标签解析
    pub fn from_label(value: &str) -> Self {
        match value {
            "control-plane" => NodeRole::ControlPlane,
            "worker" => NodeRole::Worker,
            "external-load-balancer" => NodeRole::ExternalLoadBalancer,
            _ => NodeRole::Unknown,
        }
    }
}

/// 集群节点信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub role: NodeRole,
}

/// 选择第一个控制面节点（按名称排序）
pub fn select_control_plane<'a>(
    nodes: &'a [NodeInfo],
    cluster: &str,
) -> Result<&'a NodeInfo, AppError> {
    nodes
        .iter()
        .filter(|n| n.role == NodeRole::ControlPlane)
        .min_by(|a, b| a.name.cmp(&b.name))
        .ok_or_else(|| AppError::NoControlPlane(cluster.to_string()))
}

/// 根据配置建立节点连接
///
/// Docker 后端未指定节点名时，按集群标签发现控制面节点。
pub async fn connect(config: &AppConfig) -> Result<Box<dyn NodeHandle>, AppError> {
    match config.node.backend {
        NodeBackend::Local => {
            let node = match &config.node.name {
                Some(name) => LocalNode::with_name(name.clone()),
                None => LocalNode::new(),
            };
            Ok(Box::new(node))
        }
        NodeBackend::Docker => {
            let provider = DockerNodeProvider::connect()?;
            let container = match &config.node.name {
                Some(name) => name.clone(),
                None => {
                    let nodes = provider.list_nodes(&config.node.cluster).await?;
                    select_control_plane(&nodes, &config.node.cluster)?
                        .name
                        .clone()
                }
            };
            tracing::info!(container = %container, "Using Docker node");
            Ok(Box::new(provider.node(container)))
        }
        NodeBackend::Ssh => {
            let settings = config.ssh.as_ref().ok_or_else(|| {
                AppError::Config("ssh backend selected but no ssh settings provided".to_string())
            })?;
            let mut ssh_config = settings.to_ssh_config()?;
            if let Some(name) = &config.node.name {
                ssh_config.host = name.clone();
            }
            Ok(Box::new(SshNode::new(ssh_config)))
        }
    }
}

/// 拼接命令行，必要时用单引号转义参数
pub fn shell_join(path: &str, args: &[String]) -> String {
    std::iter::once(path)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
