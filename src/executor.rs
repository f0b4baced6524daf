//! 修复执行器
//!
//! 按声明顺序逐条执行计划中的命令，对每条命令应用其失败策略：
//! - `Ignore`：记录结果后继续
//! - `AbortOnError`：失败即停止，返回 `RemediationError::FailedAt`
//! - `RetryThenIgnore(n)`：失败后立即重试最多 n 次，仍失败则记录并继续
//!
//! 执行器本身无状态，可重复调用。取消令牌触发后不再启动新的命令（包括重试），
//! 正在执行的命令由节点实现自行超时结束。

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::RemediationError;
use crate::execution::{CommandOutcome, RunReport, StepRecord, StepStatus};
use crate::node::NodeHandle;
use crate::plan::{FailurePolicy, RemediationPlan, RemoteCommand};
use crate::progress::{ProgressSink, StepEvent};

/// 修复执行器
#[derive(Debug, Clone)]
pub struct RemediationExecutor {
    /// 命令未指定超时时使用
    default_timeout: Duration,
    cancel: CancellationToken,
}

impl RemediationExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用调用方提供的取消令牌
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 执行计划
    pub async fn run(
        &self,
        node: &dyn NodeHandle,
        plan: &RemediationPlan,
        sink: &dyn ProgressSink,
    ) -> Result<(), RemediationError> {
        self.run_with_report(node, plan, sink).await.map(|_| ())
    }

    /// 执行计划并返回每一步的记录
    pub async fn run_with_report(
        &self,
        node: &dyn NodeHandle,
        plan: &RemediationPlan,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RemediationError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "remediation",
            run_id = %run_id,
            node = %node.name(),
            plan = %plan.label()
        );

        self.execute_plan(run_id, node, plan, sink)
            .instrument(span)
            .await
    }

    async fn execute_plan(
        &self,
        run_id: Uuid,
        node: &dyn NodeHandle,
        plan: &RemediationPlan,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RemediationError> {
        let start_time = Instant::now();
        let total = plan.len();

        info!(steps = total, "Starting remediation plan");
        sink.start(plan.label());

        let mut steps = Vec::with_capacity(total);

        for (index, command) in plan.commands().iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    next_step = index + 1,
                    "Remediation cancelled, not starting further commands"
                );
                sink.end(false);
                return Err(RemediationError::Cancelled { next_index: index });
            }

            info!(
                step = index + 1,
                total = total,
                description = %command.description(),
                policy = %command.policy(),
                "Starting remediation step"
            );
            sink.step(&StepEvent::Started {
                index,
                description: command.description(),
            });

            let (outcome, attempts) = self.execute_with_policy(node, command).await;

            let status = if outcome.is_success() {
                StepStatus::Succeeded
            } else if command.policy().aborts_plan() {
                StepStatus::Failed
            } else {
                StepStatus::Ignored
            };

            record_metrics(command.policy(), status);
            sink.step(&StepEvent::Finished {
                index,
                description: command.description(),
                status,
                attempts,
            });

            match status {
                StepStatus::Succeeded => {
                    info!(
                        step = index + 1,
                        attempts = attempts,
                        duration_secs = outcome.duration_secs,
                        "Remediation step completed"
                    );
                }
                StepStatus::Ignored => {
                    warn!(
                        step = index + 1,
                        description = %command.description(),
                        attempts = attempts,
                        error = %failure_text(&outcome),
                        "Remediation step failed and was ignored; cluster DNS may stay broken"
                    );
                }
                StepStatus::Failed => {
                    error!(
                        step = index + 1,
                        description = %command.description(),
                        error = %failure_text(&outcome),
                        output = %outcome.output_summary(500),
                        "Remediation step failed, aborting plan"
                    );
                    sink.end(false);
                    return Err(RemediationError::FailedAt {
                        index,
                        description: command.description().to_string(),
                        outcome,
                    });
                }
            }

            steps.push(StepRecord {
                index,
                description: command.description().to_string(),
                status,
                attempts,
                outcome,
            });
        }

        let report = RunReport {
            run_id,
            plan: plan.label().to_string(),
            node: node.name().to_string(),
            steps,
            duration_secs: start_time.elapsed().as_secs_f64(),
        };

        info!(
            succeeded = report.succeeded(),
            ignored = report.ignored_failures().len(),
            duration_secs = report.duration_secs,
            "Remediation plan completed"
        );
        sink.end(true);

        Ok(report)
    }

    /// 按策略调用命令，返回最后一次结果与调用次数
    async fn execute_with_policy(
        &self,
        node: &dyn NodeHandle,
        command: &RemoteCommand,
    ) -> (CommandOutcome, u32) {
        let max_attempts = command.policy().max_attempts();
        let mut attempts = 1;
        let mut outcome = self.attempt(node, command).await;

        while outcome.is_failure() && attempts < max_attempts {
            if self.cancel.is_cancelled() {
                debug!(
                    attempts = attempts,
                    "Cancellation requested, skipping remaining retries"
                );
                break;
            }
            attempts += 1;
            debug!(
                attempt = attempts,
                max_attempts = max_attempts,
                error = %failure_text(&outcome),
                "Retrying remediation step"
            );
            outcome = self.attempt(node, command).await;
        }

        (outcome, attempts)
    }

    async fn attempt(&self, node: &dyn NodeHandle, command: &RemoteCommand) -> CommandOutcome {
        let timeout = command.timeout().unwrap_or(self.default_timeout);
        let start_time = Instant::now();

        debug!(
            command = %command.command_line(),
            timeout_secs = timeout.as_secs(),
            "Invoking command"
        );

        let outcome = match node.execute(command.path(), command.args(), timeout).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Command could not be launched");
                CommandOutcome::launch_failed(err, start_time.elapsed().as_secs_f64())
            }
        };

        metrics::histogram!("remediation_command_duration_seconds").record(outcome.duration_secs);
        outcome
    }
}

fn failure_text(outcome: &CommandOutcome) -> String {
    outcome
        .failure()
        .map(|e| e.to_string())
        .unwrap_or_default()
}

fn record_metrics(policy: FailurePolicy, status: StepStatus) {
    metrics::counter!(
        "remediation_commands_total",
        "policy" => policy.as_str(),
        "result" => status.as_str()
    )
    .increment(1);
}
