//! 统一执行结果模型
//!
//! 定义单条命令的执行结果、失败分类以及一次计划运行的汇总报告，
//! 被各节点执行器与修复执行器共享

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExecError, LaunchError};

/// 命令执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// 退出码（未启动、超时或被信号终止时为空）
    pub exit_code: Option<i32>,

    /// 标准输出
    pub stdout: String,

    /// 标准错误
    pub stderr: String,

    /// 执行时长（秒）
    pub duration_secs: f64,

    /// 是否超时
    pub timed_out: bool,

    /// 启动失败原因
    pub launch_error: Option<LaunchError>,
}

impl CommandOutcome {
    /// 创建成功结果
    pub fn success(stdout: String, duration_secs: f64) -> Self {
        Self::completed(Some(0), stdout, String::new(), duration_secs)
    }

    /// 创建已运行结束的结果（退出码任意）
    pub fn completed(
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration_secs: f64,
    ) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            duration_secs,
            timed_out: false,
            launch_error: None,
        }
    }

    /// 创建超时结果
    pub fn timeout(duration_secs: f64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: "Execution timed out".to_string(),
            duration_secs,
            timed_out: true,
            launch_error: None,
        }
    }

    /// 创建启动失败结果
    pub fn launch_failed(error: LaunchError, duration_secs: f64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_secs,
            timed_out: false,
            launch_error: Some(error),
        }
    }

    /// 判断是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.launch_error.is_none()
    }

    /// 判断是否失败
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// 失败分类，成功时为 None
    pub fn failure(&self) -> Option<ExecError> {
        if let Some(err) = &self.launch_error {
            return Some(ExecError::Launch(err.clone()));
        }
        if self.timed_out {
            return Some(ExecError::Timeout(Duration::from_secs_f64(
                self.duration_secs.max(0.0),
            )));
        }
        match self.exit_code {
            Some(0) => None,
            Some(code) => Some(ExecError::NonZeroExit { code }),
            None => Some(ExecError::NoExitStatus),
        }
    }

    /// 获取完整输出（stdout + stderr）
    pub fn full_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
            .trim()
            .to_string()
    }

    /// 获取输出摘要（按字符截断）
    pub fn output_summary(&self, max_chars: usize) -> String {
        let full = self.full_output();
        if full.chars().count() <= max_chars {
            full
        } else {
            let truncated: String = full.chars().take(max_chars).collect();
            format!("{}...", truncated)
        }
    }
}

/// 失败原因分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 无法启动命令
    LaunchFailed,
    /// 非零退出码
    NonZeroExit,
    /// 命令超时
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::LaunchFailed => "launch_failed",
            FailureReason::NonZeroExit => "non_zero_exit",
            FailureReason::Timeout => "timeout",
        }
    }
}

/// 步骤最终状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// 成功
    Succeeded,
    /// 失败并中止计划
    Failed,
    /// 失败但按策略忽略
    Ignored,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Ignored => "ignored",
        }
    }
}

/// 单个步骤的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// 步骤下标（从 0 开始）
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    /// 实际调用次数（含重试）
    pub attempts: u32,
    /// 最后一次调用的结果
    pub outcome: CommandOutcome,
}

impl StepRecord {
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.outcome.failure().map(|e| e.reason())
    }
}

/// 一次计划运行的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub plan: String,
    pub node: String,
    pub steps: Vec<StepRecord>,
    pub duration_secs: f64,
}

impl RunReport {
    /// 成功步骤数
    pub fn succeeded(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .count()
    }

    /// 被忽略的失败步骤
    pub fn ignored_failures(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Ignored)
            .collect()
    }

    /// 所有步骤都成功（没有被忽略的失败）
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Succeeded)
    }

    /// 总调用次数
    pub fn total_attempts(&self) -> u32 {
        self.steps.iter().map(|s| s.attempts).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success() {
        let outcome = CommandOutcome::success("output".to_string(), 1.5);
        assert!(outcome.is_success());
        assert!(!outcome.is_failure());
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.failure().is_none());
    }

    #[test]
    fn test_outcome_non_zero_exit() {
        let outcome =
            CommandOutcome::completed(Some(1), "stdout".to_string(), "stderr".to_string(), 2.0);
        assert!(outcome.is_failure());
        assert_eq!(outcome.failure(), Some(ExecError::NonZeroExit { code: 1 }));
    }

    #[test]
    fn test_outcome_killed_without_status() {
        let outcome = CommandOutcome::completed(None, String::new(), String::new(), 0.5);
        assert!(outcome.is_failure());
        assert_eq!(outcome.failure(), Some(ExecError::NoExitStatus));
    }

    #[test]
    fn test_outcome_timeout() {
        let outcome = CommandOutcome::timeout(30.0);
        assert!(outcome.is_failure());
        assert!(outcome.timed_out);
        assert_eq!(
            outcome.failure(),
            Some(ExecError::Timeout(Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_outcome_launch_failed() {
        let outcome = CommandOutcome::launch_failed(LaunchError::new("node-1", "no route"), 0.1);
        assert!(outcome.is_failure());
        assert_eq!(
            outcome.failure().map(|e| e.reason()),
            Some(FailureReason::LaunchFailed)
        );
    }

    #[test]
    fn test_outcome_full_output() {
        let outcome = CommandOutcome::completed(
            Some(0),
            "line1\nline2".to_string(),
            "error".to_string(),
            1.0,
        );

        let full = outcome.full_output();
        assert!(full.contains("line1"));
        assert!(full.contains("error"));
    }

    #[test]
    fn test_outcome_summary_is_char_safe() {
        let outcome = CommandOutcome::success("é".repeat(100), 1.0);

        let summary = outcome.output_summary(10);
        assert_eq!(summary.chars().count(), 13); // 10 + "..."
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_step_status_serialization() {
        let statuses = vec![
            (StepStatus::Succeeded, "succeeded"),
            (StepStatus::Failed, "failed"),
            (StepStatus::Ignored, "ignored"),
        ];

        for (status, expected) in statuses {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
            assert_eq!(status.as_str(), expected);
        }
    }

    #[test]
    fn test_run_report_counts() {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            plan: "test".to_string(),
            node: "node".to_string(),
            steps: vec![
                StepRecord {
                    index: 0,
                    description: "a".to_string(),
                    status: StepStatus::Succeeded,
                    attempts: 1,
                    outcome: CommandOutcome::success(String::new(), 0.1),
                },
                StepRecord {
                    index: 1,
                    description: "b".to_string(),
                    status: StepStatus::Ignored,
                    attempts: 3,
                    outcome: CommandOutcome::completed(Some(1), String::new(), String::new(), 0.1),
                },
            ],
            duration_secs: 0.2,
        };

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.ignored_failures().len(), 1);
        assert_eq!(
            report.steps[1].failure_reason(),
            Some(FailureReason::NonZeroExit)
        );
        assert!(!report.is_clean());
        assert_eq!(report.total_attempts(), 4);
    }
}
