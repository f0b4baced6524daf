//! SSH 节点
//!
//! 使用 russh 连接远程控制面主机并执行命令。
//! 每次执行建立独立连接：连接 -> 认证 -> 打开会话通道 -> exec -> 读取输出直到退出或超时。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::client::{self, Config};
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sha2::Digest;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::NodeHandle;
use crate::error::LaunchError;
use crate::execution::CommandOutcome;

/// 主机密钥验证策略
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：已知主机必须匹配，未知主机首次接受
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于开发/测试）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// SSH 认证方式
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// 密码认证
    Password(Secret<String>),
    /// 私钥认证（PEM / OpenSSH 格式内容）
    Key {
        private_key: Secret<String>,
        passphrase: Option<Secret<String>>,
    },
    /// 私钥文件
    KeyFile {
        path: PathBuf,
        passphrase: Option<Secret<String>>,
    },
}

/// SSH 连接配置
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 握手超时（秒）
    pub handshake_timeout_secs: u64,
    pub host_key_verification: HostKeyVerification,
    /// 已知主机指纹，键为 `host:port`，值为 SHA-256 十六进制
    pub known_hosts: Option<HashMap<String, String>>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth,
            connect_timeout_secs: 10,
            handshake_timeout_secs: 10,
            host_key_verification: HostKeyVerification::default(),
            known_hosts: None,
        }
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置主机密钥验证策略
    pub fn with_host_key_verification(mut self, verification: HostKeyVerification) -> Self {
        self.host_key_verification = verification;
        self
    }

    /// `client::connect` 同时完成 TCP 连接与握手，两段超时累加
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .saturating_add(self.handshake_timeout_secs),
        )
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// SSH 节点
pub struct SshNode {
    config: SshConfig,
}

impl SshNode {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn launch_error(&self, message: String) -> LaunchError {
        LaunchError::new(&self.config.host, message)
    }

    /// 建立连接并完成认证
    async fn open_session(&self) -> Result<client::Handle<SshSession>, LaunchError> {
        let client_config = Arc::new(Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });

        let session = SshSession {
            verification_mode: self.config.host_key_verification.clone(),
            known_hosts: self.config.known_hosts.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
        };

        let mut handle = timeout(
            self.config.setup_timeout(),
            client::connect(client_config, (self.config.host.clone(), self.config.port), session),
        )
        .await
        .map_err(|_| self.launch_error(format!("connection timed out: {}", self.config.target())))?
        .map_err(|e| {
            error!(error = %e, target = %self.config.target(), "SSH connection failed");
            self.launch_error(format!("connection failed: {}", e))
        })?;

        let auth_result = match &self.config.auth {
            SshAuth::Password(password) => {
                handle
                    .authenticate_password(self.config.username.clone(), password.expose_secret())
                    .await
            }
            SshAuth::Key {
                private_key,
                passphrase,
            } => {
                let key = russh_keys::decode_secret_key(
                    private_key.expose_secret(),
                    passphrase.as_ref().map(|p| p.expose_secret().as_str()),
                )
                .map_err(|e| self.launch_error(format!("failed to decode private key: {}", e)))?;
                handle
                    .authenticate_publickey(self.config.username.clone(), Arc::new(key))
                    .await
            }
            SshAuth::KeyFile { path, passphrase } => {
                let key = russh_keys::load_secret_key(
                    path,
                    passphrase.as_ref().map(|p| p.expose_secret().as_str()),
                )
                .map_err(|e| {
                    self.launch_error(format!(
                        "failed to load private key {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                handle
                    .authenticate_publickey(self.config.username.clone(), Arc::new(key))
                    .await
            }
        };

        if !auth_result.unwrap_or(false) {
            error!(target = %self.config.target(), "SSH authentication failed");
            return Err(self.launch_error("authentication failed".to_string()));
        }

        debug!(target = %self.config.target(), "SSH session authenticated");
        Ok(handle)
    }
}

#[async_trait]
impl NodeHandle for SshNode {
    fn name(&self) -> &str {
        &self.config.host
    }

    async fn execute(
        &self,
        path: &str,
        args: &[String],
        command_timeout: Duration,
    ) -> Result<CommandOutcome, LaunchError> {
        let start_time = Instant::now();
        let command = super::shell_join(path, args);

        debug!(
            target = %self.config.target(),
            command = %command,
            timeout_secs = command_timeout.as_secs(),
            "Executing SSH command"
        );

        let handle = self.open_session().await?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| self.launch_error(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| self.launch_error(format!("failed to exec command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        let mut eof = false;
        let mut timed_out = false;

        // 超时按整条命令计算，而不是每条消息
        let deadline = tokio::time::Instant::now() + command_timeout;

        loop {
            match tokio::time::timeout_at(deadline, channel.wait()).await {
                Ok(Some(ChannelMsg::Data { ref data })) => {
                    stdout.extend_from_slice(data);
                }
                Ok(Some(ChannelMsg::ExtendedData { ref data, ext })) => {
                    // SSH_EXTENDED_DATA_STDERR
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                // Eof 与 ExitStatus 的到达顺序不固定，两者都收到后才结束
                Ok(Some(ChannelMsg::ExitStatus { exit_status })) => {
                    exit_code = Some(exit_status as i32);
                    if eof {
                        break;
                    }
                }
                Ok(Some(ChannelMsg::Eof)) => {
                    eof = true;
                    if exit_code.is_some() {
                        break;
                    }
                }
                Ok(None) => break,
                Ok(Some(_)) => {}
                Err(_) => {
                    warn!(
                        target = %self.config.target(),
                        timeout = ?command_timeout,
                        "SSH command timed out"
                    );
                    timed_out = true;
                    break;
                }
            }
        }

        let _ = channel.close().await;
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;

        let duration_secs = start_time.elapsed().as_secs_f64();

        if timed_out {
            return Ok(CommandOutcome::timeout(duration_secs));
        }

        info!(
            target = %self.config.target(),
            exit_code = ?exit_code,
            duration_secs = duration_secs,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "SSH command executed"
        );

        Ok(CommandOutcome::completed(
            exit_code,
            String::from_utf8_lossy(&stdout).to_string(),
            String::from_utf8_lossy(&stderr).to_string(),
            duration_secs,
        ))
    }
}

/// SSH 客户端会话处理器
struct SshSession {
    verification_mode: HostKeyVerification,
    known_hosts: Option<HashMap<String, String>>,
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for SshSession {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let host_key = format!("{}:{}", self.host, self.port);
        let fingerprint = fingerprint(&server_public_key.public_key_base64());
        Ok(verify_host_key(
            &self.verification_mode,
            self.known_hosts.as_ref(),
            &host_key,
            &fingerprint,
        ))
    }
}

/// 主机公钥的 SHA-256 指纹（十六进制）
pub fn fingerprint(public_key_base64: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(public_key_base64.as_bytes());
    hex::encode(hasher.finalize())
}

/// 按验证策略判断是否接受主机密钥
pub fn verify_host_key(
    mode: &HostKeyVerification,
    known_hosts: Option<&HashMap<String, String>>,
    host_key: &str,
    fingerprint: &str,
) -> bool {
    if *mode == HostKeyVerification::Disabled {
        warn!(host = %host_key, "Host key verification DISABLED - accepting all keys");
        return true;
    }

    match known_hosts.and_then(|hosts| hosts.get(host_key)) {
        Some(stored) if stored == fingerprint => {
            debug!(host = %host_key, "Host key verified");
            true
        }
        Some(stored) => {
            error!(
                host = %host_key,
                expected = %stored,
                actual = %fingerprint,
                "Host key mismatch - rejecting connection"
            );
            false
        }
        None if *mode == HostKeyVerification::Accept => {
            info!(
                host = %host_key,
                fingerprint = %fingerprint,
                "First time connecting - accepting host key"
            );
            true
        }
        None => {
            error!(host = %host_key, "Unknown host in strict mode - rejecting connection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(host: &str, fp: &str) -> HashMap<String, String> {
        let mut hosts = HashMap::new();
        hosts.insert(host.to_string(), fp.to_string());
        hosts
    }

    #[test]
    fn test_host_key_verification_from_str() {
        assert_eq!("strict".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Strict);
        assert_eq!("Accept".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Accept);
        assert_eq!("none".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Disabled);
        assert!("sometimes".parse::<HostKeyVerification>().is_err());
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = fingerprint("AAAAC3NzaC1lZDI1NTE5");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint("AAAAC3NzaC1lZDI1NTE5"));
    }

    #[test]
    fn test_verify_known_host() {
        let hosts = known("10.0.0.1:22", "abc");
        for mode in [HostKeyVerification::Strict, HostKeyVerification::Accept] {
            assert!(verify_host_key(&mode, Some(&hosts), "10.0.0.1:22", "abc"));
            assert!(!verify_host_key(&mode, Some(&hosts), "10.0.0.1:22", "def"));
        }
    }

    #[test]
    fn test_verify_unknown_host() {
        assert!(verify_host_key(&HostKeyVerification::Accept, None, "10.0.0.2:22", "abc"));
        assert!(!verify_host_key(&HostKeyVerification::Strict, None, "10.0.0.2:22", "abc"));
    }

    #[test]
    fn test_verify_disabled_accepts_mismatch() {
        let hosts = known("10.0.0.1:22", "abc");
        assert!(verify_host_key(
            &HostKeyVerification::Disabled,
            Some(&hosts),
            "10.0.0.1:22",
            "def"
        ));
    }

    #[test]
    fn test_setup_timeout_covers_both_phases() {
        let mut config = SshConfig::new(
            "cp.example.com",
            "root",
            SshAuth::Password(Secret::new("pass".to_string())),
        );
        config.connect_timeout_secs = 5;
        config.handshake_timeout_secs = 30;
        assert_eq!(config.setup_timeout(), Duration::from_secs(35));

        config.handshake_timeout_secs = u64::MAX;
        assert_eq!(config.setup_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_ssh_config_builder() {
        let config = SshConfig::new(
            "cp.example.com",
            "root",
            SshAuth::Password(Secret::new("pass".to_string())),
        )
        .with_port(2222)
        .with_host_key_verification(HostKeyVerification::Strict);

        assert_eq!(config.target(), "root@cp.example.com:2222");
        assert_eq!(config.setup_timeout(), Duration::from_secs(20));
        assert_eq!(config.host_key_verification, HostKeyVerification::Strict);
        assert_eq!(SshNode::new(config).name(), "cp.example.com");
    }
}
