//! 测试公共模块
//! 提供可编排的假节点与记录型进度上报

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cluster_remediation::{
    config::PlanSettings,
    progress::{ProgressSink, StepEvent},
    CommandOutcome, FailurePolicy, LaunchError, NodeHandle, RemediationPlan, RemoteCommand,
};
use tokio_util::sync::CancellationToken;

/// 预设的单次调用结果
#[derive(Debug, Clone, Copy)]
pub enum Response {
    Exit(i32),
    Launch,
    Timeout,
}

/// 按命令行子串匹配返回预设结果的假节点，并记录每一次调用
pub struct ScriptedNode {
    /// (匹配子串, 结果序列)；序列耗尽后重复最后一个
    script: Mutex<Vec<(String, Vec<Response>)>>,
    calls: Mutex<Vec<(String, Duration)>>,
    /// 执行期间触发的取消令牌
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedNode {
    /// 所有命令都成功
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    /// 每次调用时取消 `token`，模拟执行中途收到中断
    pub fn cancel_during_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    /// 命令行包含 `needle` 时按顺序返回 `responses`
    pub fn respond(self, needle: &str, responses: Vec<Response>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push((needle.to_string(), responses));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(line, _)| line.clone())
            .collect()
    }

    /// 每次调用收到的超时
    pub fn timeouts(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, timeout)| *timeout)
            .collect()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }

    fn next_response(&self, line: &str) -> Response {
        let mut script = self.script.lock().unwrap();
        for (needle, responses) in script.iter_mut() {
            if line.contains(needle.as_str()) {
                return if responses.len() > 1 {
                    responses.remove(0)
                } else {
                    responses.first().copied().unwrap_or(Response::Exit(0))
                };
            }
        }
        Response::Exit(0)
    }
}

#[async_trait]
impl NodeHandle for ScriptedNode {
    fn name(&self) -> &str {
        "scripted-node"
    }

    async fn execute(
        &self,
        path: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome, LaunchError> {
        let line = std::iter::once(path.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push((line.clone(), timeout));
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }

        match self.next_response(&line) {
            Response::Exit(0) => Ok(CommandOutcome::success(String::new(), 0.01)),
            Response::Exit(code) => Ok(CommandOutcome::completed(
                Some(code),
                String::new(),
                format!("exit {}", code),
                0.01,
            )),
            Response::Launch => Err(LaunchError::new("scripted-node", "connection refused")),
            Response::Timeout => Ok(CommandOutcome::timeout(0.01)),
        }
    }
}

/// 记录进度事件
#[derive(Default)]
pub struct RecordingSink {
    pub starts: Mutex<Vec<String>>,
    pub ends: Mutex<Vec<bool>>,
    pub finished: Mutex<Vec<(usize, String)>>,
}

impl RecordingSink {
    pub fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    pub fn ends(&self) -> Vec<bool> {
        self.ends.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<(usize, String)> {
        self.finished.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn start(&self, label: &str) {
        self.starts.lock().unwrap().push(label.to_string());
    }

    fn end(&self, success: bool) {
        self.ends.lock().unwrap().push(success);
    }

    fn step(&self, event: &StepEvent<'_>) {
        if let StepEvent::Finished { index, status, .. } = event {
            self.finished
                .lock()
                .unwrap()
                .push((*index, status.as_str().to_string()));
        }
    }
}

/// 测试用计划参数
pub fn test_plan_settings() -> PlanSettings {
    PlanSettings {
        kubectl: "kubectl".to_string(),
        kubeconfig: "/etc/kubernetes/admin.conf".to_string(),
        wait_timeout_secs: 300,
        wait_grace_secs: 30,
        command_timeout_secs: 60,
        retry_attempts: 2,
        tolerate_dns_failure: false,
    }
}

/// 每条命令为 `echo <name>`
pub fn plan_of(commands: &[(&str, FailurePolicy)]) -> RemediationPlan {
    let commands = commands
        .iter()
        .map(|(name, policy)| RemoteCommand::new("echo", [*name], *policy, *name))
        .collect();
    RemediationPlan::new("test plan", commands).unwrap()
}
