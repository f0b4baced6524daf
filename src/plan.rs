//! 修复计划
//!
//! 计划是一组按声明顺序执行的远程命令，每条命令自带失败策略。
//! `dns_remediation_plan` 生成集群启动后修复 DNS 的标准计划。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PlanSettings;
use crate::error::AppError;
use crate::node::shell_join;

/// 单条命令的失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 记录结果后继续
    Ignore,
    /// 失败即中止整个计划
    AbortOnError,
    /// 失败后最多再重试 n 次（无退避），仍失败则忽略
    RetryThenIgnore(u32),
}

impl FailurePolicy {
    /// 最多调用次数
    pub fn max_attempts(&self) -> u32 {
        match self {
            FailurePolicy::RetryThenIgnore(retries) => retries.saturating_add(1),
            FailurePolicy::Ignore | FailurePolicy::AbortOnError => 1,
        }
    }

    /// 失败时是否中止计划
    pub fn aborts_plan(&self) -> bool {
        matches!(self, FailurePolicy::AbortOnError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Ignore => "ignore",
            FailurePolicy::AbortOnError => "abort_on_error",
            FailurePolicy::RetryThenIgnore(_) => "retry_then_ignore",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::RetryThenIgnore(n) => write!(f, "retry_then_ignore({})", n),
            other => f.write_str(other.as_str()),
        }
    }
}

/// 远程命令（构造后不可变）
/// 只能通过 `new` 构造，不支持反序列化
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCommand {
    path: String,
    args: Vec<String>,
    policy: FailurePolicy,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
}

impl RemoteCommand {
    pub fn new<I, S>(
        path: impl Into<String>,
        args: I,
        policy: FailurePolicy,
        description: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            args: args.into_iter().map(Into::into).collect(),
            policy,
            description: description.into(),
            timeout_secs: None,
        }
    }

    /// 设置单条命令超时（覆盖执行器默认值）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// 完整命令行（用于日志）
    pub fn command_line(&self) -> String {
        shell_join(&self.path, &self.args)
    }
}

/// 修复计划
/// 只能通过 `new` 构造，保证计划非空且命令路径有效
#[derive(Debug, Clone, Serialize)]
pub struct RemediationPlan {
    label: String,
    commands: Vec<RemoteCommand>,
}

impl RemediationPlan {
    /// 创建计划，命令列表不能为空
    pub fn new(label: impl Into<String>, commands: Vec<RemoteCommand>) -> Result<Self, AppError> {
        let label = label.into();
        if commands.is_empty() {
            return Err(AppError::InvalidPlan(format!(
                "plan '{}' has no commands",
                label
            )));
        }
        if let Some(command) = commands.iter().find(|c| c.path.trim().is_empty()) {
            return Err(AppError::InvalidPlan(format!(
                "command '{}' has an empty executable path",
                command.description
            )));
        }
        Ok(Self { label, commands })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn commands(&self) -> &[RemoteCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub const DNS_PLAN_LABEL: &str = "Provisioning cluster DNS";

/// 构造 DNS 修复计划
///
/// 删除过期的 kube-root-ca.crt、重建 kube-proxy，然后重启 CoreDNS 并等待其可用。
/// 后两步默认失败即中止；`tolerate_dns_failure` 打开时改为重试后忽略。
pub fn dns_remediation_plan(settings: &PlanSettings) -> Result<RemediationPlan, AppError> {
    let kubeconfig = format!("--kubeconfig={}", settings.kubeconfig);
    let kubectl = |args: &[&str]| -> Vec<String> {
        std::iter::once(kubeconfig.clone())
            .chain(args.iter().map(|a| a.to_string()))
            .collect()
    };

    let dns_policy = if settings.tolerate_dns_failure {
        FailurePolicy::RetryThenIgnore(settings.retry_attempts)
    } else {
        FailurePolicy::AbortOnError
    };
    let wait_timeout = format!("--timeout={}s", settings.wait_timeout_secs);

    let commands = vec![
        RemoteCommand::new(
            &settings.kubectl,
            kubectl(&["delete", "cm", "kube-root-ca.crt", "-n", "kube-system"]),
            FailurePolicy::Ignore,
            "Delete kube-root-ca.crt in kube-system",
        ),
        RemoteCommand::new(
            &settings.kubectl,
            kubectl(&["delete", "cm", "kube-root-ca.crt", "-n", "kube-public"]),
            FailurePolicy::Ignore,
            "Delete kube-root-ca.crt in kube-public",
        ),
        RemoteCommand::new(
            &settings.kubectl,
            kubectl(&["delete", "pods", "-l", "k8s-app=kube-proxy", "-n", "kube-system"]),
            FailurePolicy::Ignore,
            "Recreate kube-proxy pods",
        ),
        RemoteCommand::new(
            &settings.kubectl,
            kubectl(&["rollout", "restart", "deployment/coredns", "-n", "kube-system"]),
            dns_policy,
            "Restart CoreDNS deployment",
        ),
        RemoteCommand::new(
            &settings.kubectl,
            kubectl(&[
                "wait",
                "--for=condition=available",
                wait_timeout.as_str(),
                "deployment/coredns",
                "-n",
                "kube-system",
            ]),
            dns_policy,
            "Wait for CoreDNS to become available",
        )
        .with_timeout(settings.wait_command_timeout()),
    ];

    RemediationPlan::new(DNS_PLAN_LABEL, commands)
}
