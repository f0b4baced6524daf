//! 统一错误模型
//! 定义命令执行、修复计划以及外围组件（配置、节点连接）的错误类型

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::{CommandOutcome, FailureReason};

/// 远程命令无法启动（网络、认证或传输通道问题）
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("failed to launch command on {node}: {message}")]
pub struct LaunchError {
    /// 目标节点名称
    pub node: String,
    /// 失败原因
    pub message: String,
}

impl LaunchError {
    pub fn new(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            message: message.into(),
        }
    }
}

/// 单条命令的失败分类
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("command exited with status {code}")]
    NonZeroExit { code: i32 },

    #[error("command killed before reporting an exit status")]
    NoExitStatus,

    #[error("command timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl ExecError {
    /// 失败原因分类（用于日志与指标标签）
    pub fn reason(&self) -> FailureReason {
        match self {
            ExecError::Launch(_) => FailureReason::LaunchFailed,
            ExecError::NonZeroExit { .. } | ExecError::NoExitStatus => FailureReason::NonZeroExit,
            ExecError::Timeout(_) => FailureReason::Timeout,
        }
    }
}

/// 修复计划级错误
#[derive(Debug, Clone, Error)]
pub enum RemediationError {
    /// AbortOnError 策略的命令失败，计划被中止
    #[error(
        "remediation step {step} ({description}) failed: {cause}",
        step = .index + 1,
        cause = describe_failure(.outcome)
    )]
    FailedAt {
        /// 失败命令在计划中的下标（从 0 开始）
        index: usize,
        description: String,
        outcome: CommandOutcome,
    },

    /// 调用方取消，后续命令未启动
    #[error("remediation cancelled before step {step}", step = .next_index + 1)]
    Cancelled { next_index: usize },
}

impl RemediationError {
    /// 导致计划中止的命令失败原因
    pub fn cause(&self) -> Option<ExecError> {
        match self {
            RemediationError::FailedAt { outcome, .. } => outcome.failure(),
            RemediationError::Cancelled { .. } => None,
        }
    }
}

fn describe_failure(outcome: &CommandOutcome) -> String {
    match outcome.failure() {
        Some(err) => {
            let output = outcome.output_summary(200);
            if output.is_empty() {
                err.to_string()
            } else {
                format!("{}: {}", err, output)
            }
        }
        None => "unknown failure".to_string(),
    }
}

/// 外围组件错误（配置、计划构造、节点连接与发现）
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Docker error: {0}")]
    Docker(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("No control-plane node found in cluster {0}")]
    NoControlPlane(String),

    #[error(transparent)]
    Remediation(#[from] RemediationError),
}

impl AppError {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::InvalidPlan(_) => 2,
            AppError::Docker(_) | AppError::Ssh(_) | AppError::NoControlPlane(_) => 3,
            AppError::Remediation(_) => 1,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<bollard::errors::Error> for AppError {
    fn from(e: bollard::errors::Error) -> Self {
        AppError::Docker(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_at_names_step() {
        let error = RemediationError::FailedAt {
            index: 3,
            description: "restart coredns".to_string(),
            outcome: CommandOutcome::completed(Some(1), String::new(), "boom".to_string(), 0.2),
        };

        let message = error.to_string();
        assert!(message.contains("step 4"));
        assert!(message.contains("restart coredns"));
        assert!(message.contains("status 1"));
        assert!(message.contains("boom"));
        assert_eq!(error.cause(), Some(ExecError::NonZeroExit { code: 1 }));
    }

    #[test]
    fn test_cancelled_message() {
        let error = RemediationError::Cancelled { next_index: 0 };
        assert_eq!(error.to_string(), "remediation cancelled before step 1");
        assert!(error.cause().is_none());
    }

    #[test]
    fn test_exec_error_reason() {
        let launch = ExecError::Launch(LaunchError::new("node", "unreachable"));
        assert_eq!(launch.reason(), FailureReason::LaunchFailed);
        assert_eq!(
            ExecError::Timeout(Duration::from_secs(3)).reason(),
            FailureReason::Timeout
        );
        assert_eq!(
            ExecError::NonZeroExit { code: 2 }.reason(),
            FailureReason::NonZeroExit
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::Config("x".to_string()).exit_code(), 2);
        assert_eq!(AppError::NoControlPlane("kind".to_string()).exit_code(), 3);
        let remediation = AppError::from(RemediationError::Cancelled { next_index: 2 });
        assert_eq!(remediation.exit_code(), 1);
    }

    #[test]
    fn test_config_error_conversion() {
        let error: AppError = config::ConfigError::Message("bad".to_string()).into();
        assert!(matches!(error, AppError::Config(_)));
    }
}
