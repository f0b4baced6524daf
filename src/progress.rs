//! 进度上报
//!
//! 执行器通过 `ProgressSink` 向外报告计划的开始与结束，以及每一步的状态。
//! 上报只用于观察，不影响执行流程。

use std::io::Write;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::execution::StepStatus;

/// 单步进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent<'a> {
    Started {
        index: usize,
        description: &'a str,
    },
    Finished {
        index: usize,
        description: &'a str,
        status: StepStatus,
        attempts: u32,
    },
}

/// 进度上报接口
pub trait ProgressSink: Send + Sync {
    /// 计划开始
    fn start(&self, label: &str);

    /// 计划结束
    fn end(&self, success: bool);

    /// 单步进度（默认忽略）
    fn step(&self, _event: &StepEvent<'_>) {}
}

/// 写入结构化日志
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn start(&self, label: &str) {
        info!(label = %label, "Remediation started");
    }

    fn end(&self, success: bool) {
        if success {
            info!("Remediation finished");
        } else {
            warn!("Remediation failed");
        }
    }

    fn step(&self, event: &StepEvent<'_>) {
        match event {
            StepEvent::Started { index, description } => {
                info!(step = index + 1, description = %description, "Step started");
            }
            StepEvent::Finished {
                index,
                description,
                status,
                attempts,
            } => {
                info!(
                    step = index + 1,
                    description = %description,
                    status = status.as_str(),
                    attempts = attempts,
                    "Step finished"
                );
            }
        }
    }
}

/// 终端状态行
///
/// `start` 打印进行中的标签，`end` 打印结果；重复的 `end` 被忽略。
pub struct TerminalStatus<W: Write + Send = std::io::Stderr> {
    out: Mutex<W>,
    current: Mutex<Option<String>>,
}

impl TerminalStatus {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> TerminalStatus<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            current: Mutex::new(None),
        }
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> ProgressSink for TerminalStatus<W> {
    fn start(&self, label: &str) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(label.to_string());
        }
        self.write_line(&format!(" • {} ...", label));
    }

    fn end(&self, success: bool) {
        let label = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };
        if let Some(label) = label {
            let mark = if success { "✓" } else { "✗" };
            self.write_line(&format!(" {} {}", mark, label));
        }
    }

    fn step(&self, event: &StepEvent<'_>) {
        if let StepEvent::Finished {
            description,
            status: StepStatus::Ignored,
            ..
        } = event
        {
            self.write_line(&format!("   ! {} failed (ignored)", description));
        }
    }
}
