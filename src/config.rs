//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;

use crate::error::AppError;
use crate::node::{HostKeyVerification, SshAuth, SshConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

/// 修复计划参数
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSettings {
    /// kubectl 可执行文件路径（节点内）
    pub kubectl: String,
    /// 节点内 kubeconfig 路径
    pub kubeconfig: String,
    /// 等待 CoreDNS 可用的超时（秒），传给 kubectl wait
    pub wait_timeout_secs: u64,
    /// wait 命令在 kubectl 超时之外额外允许的时间（秒）
    pub wait_grace_secs: u64,
    /// 其余命令的默认超时（秒）
    pub command_timeout_secs: u64,
    /// 容忍模式下 DNS 步骤的重试次数
    pub retry_attempts: u32,
    /// DNS 步骤失败时不中止启动流程
    pub tolerate_dns_failure: bool,
}

impl PlanSettings {
    /// 默认命令超时
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// wait 命令的执行超时
    pub fn wait_command_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs.saturating_add(self.wait_grace_secs))
    }
}

/// 节点执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeBackend {
    /// 节点容器（Docker exec）
    Docker,
    /// 远程主机（SSH）
    Ssh,
    /// 本机进程
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    pub backend: NodeBackend,
    /// 集群名称（用于发现控制面节点）
    pub cluster: String,
    /// 节点名称：Docker 为容器名，SSH 为主机地址；为空时自动发现
    pub name: Option<String>,
}

/// SSH 连接参数
#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_username")]
    pub username: String,
    pub password: Option<Secret<String>>,
    /// 私钥内容
    pub private_key: Option<Secret<String>>,
    /// 私钥文件路径
    pub private_key_path: Option<PathBuf>,
    pub passphrase: Option<Secret<String>>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub handshake_timeout_secs: u64,
    /// strict, accept, disabled
    #[serde(default = "default_host_key_verification")]
    pub host_key_verification: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_username() -> String {
    "root".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_host_key_verification() -> String {
    "accept".to_string()
}

impl SshSettings {
    /// 认证方式优先级：私钥文件 > 私钥内容 > 密码
    pub fn to_auth(&self) -> Result<SshAuth, AppError> {
        if let Some(path) = &self.private_key_path {
            return Ok(SshAuth::KeyFile {
                path: path.clone(),
                passphrase: self.passphrase.clone(),
            });
        }
        if let Some(key) = &self.private_key {
            return Ok(SshAuth::Key {
                private_key: key.clone(),
                passphrase: self.passphrase.clone(),
            });
        }
        if let Some(password) = &self.password {
            return Ok(SshAuth::Password(password.clone()));
        }
        Err(AppError::Config(
            "ssh requires one of private_key_path, private_key or password".to_string(),
        ))
    }

    pub fn to_ssh_config(&self) -> Result<SshConfig, AppError> {
        let verification: HostKeyVerification =
            self.host_key_verification.parse().map_err(AppError::Config)?;

        let mut config = SshConfig::new(self.host.clone(), self.username.clone(), self.to_auth()?)
            .with_port(self.port)
            .with_host_key_verification(verification);
        config.connect_timeout_secs = self.connect_timeout_secs;
        config.handshake_timeout_secs = self.handshake_timeout_secs;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub plan: PlanSettings,
    pub node: NodeSettings,
    pub ssh: Option<SshSettings>,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("plan.kubectl", "kubectl")?
            .set_default("plan.kubeconfig", "/etc/kubernetes/admin.conf")?
            .set_default("plan.wait_timeout_secs", 300)?
            .set_default("plan.wait_grace_secs", 30)?
            .set_default("plan.command_timeout_secs", 60)?
            .set_default("plan.retry_attempts", 2)?
            .set_default("plan.tolerate_dns_failure", false)?
            .set_default("node.backend", "docker")?
            .set_default("node.cluster", "kind")?;

        // 从环境变量加载配置（前缀为 REMEDIATION_）
        settings = settings.add_source(
            Environment::with_prefix("REMEDIATION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.plan.kubectl.trim().is_empty() {
            return Err(ConfigError::Message("plan.kubectl must not be empty".to_string()));
        }

        if self.plan.wait_timeout_secs < 1 || self.plan.wait_timeout_secs > 3600 {
            return Err(ConfigError::Message(
                "wait_timeout_secs must be between 1 and 3600".to_string(),
            ));
        }

        if self.plan.wait_grace_secs > 3600 {
            return Err(ConfigError::Message(
                "wait_grace_secs must be between 0 and 3600".to_string(),
            ));
        }

        if self.plan.command_timeout_secs < 1 || self.plan.command_timeout_secs > 3600 {
            return Err(ConfigError::Message(
                "command_timeout_secs must be between 1 and 3600".to_string(),
            ));
        }

        if self.plan.retry_attempts > 10 {
            return Err(ConfigError::Message(
                "retry_attempts must be at most 10".to_string(),
            ));
        }

        if self.node.cluster.trim().is_empty() {
            return Err(ConfigError::Message("node.cluster must not be empty".to_string()));
        }

        if self.node.backend == NodeBackend::Ssh && self.ssh.is_none() {
            return Err(ConfigError::Message(
                "ssh backend requires REMEDIATION_SSH__HOST and credentials".to_string(),
            ));
        }

        Ok(())
    }
}
