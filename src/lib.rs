//! 集群 DNS 修复执行器
//!
//! 在集群控制面节点上按顺序执行一组修复命令，每条命令带有明确的失败策略，
//! 失败可以被重试、忽略或中止整个计划，并通过进度接口向外报告。

pub mod config;
pub mod error;
pub mod execution;
pub mod executor;
pub mod node;
pub mod plan;
pub mod progress;
pub mod telemetry;

pub use error::{AppError, ExecError, LaunchError, RemediationError};
pub use execution::{CommandOutcome, RunReport, StepRecord, StepStatus};
pub use executor::RemediationExecutor;
pub use node::NodeHandle;
pub use plan::{dns_remediation_plan, FailurePolicy, RemediationPlan, RemoteCommand};
pub use progress::{LogProgress, ProgressSink, TerminalStatus};
