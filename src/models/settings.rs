// Settings 配置数据结构

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ssh::backoff::BackoffSchedule;

// ======================== 主配置结构 ========================

/// 引导设置（持久化用）
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapSettings {
    pub ssh: SshSettings,
    pub backoff: BackoffSettings,
    pub scanner: ScannerSettings,
    pub known_hosts: KnownHostsSettings,
}

// ======================== SSH 设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshSettings {
    pub username: String,
    pub port: u16,
    pub readiness_command: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// 保存私钥密码的环境变量名（不在配置文件里存密码）
    pub passphrase_env: Option<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            port: 22,
            readiness_command: "docker info".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
            passphrase_env: None,
        }
    }
}

impl SshSettings {
    /// 从环境变量读取私钥密码
    pub fn passphrase(&self) -> Option<String> {
        self.passphrase_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
    }
}

// ======================== 退避设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffSettings {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_secs: u64,
    pub max_elapsed_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1000,
            multiplier: 1.3,
            max_interval_secs: 60,
            max_elapsed_secs: 60,
        }
    }
}

impl BackoffSettings {
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            multiplier: self.multiplier,
            max_interval: Duration::from_secs(self.max_interval_secs),
            max_elapsed: Duration::from_secs(self.max_elapsed_secs),
        }
    }
}

// ======================== 扫描设置 ========================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    /// 外部 ssh-keyscan
    #[default]
    Keyscan,
    /// 纯 Rust 握手
    Native,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerSettings {
    pub kind: ScannerKind,
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            kind: ScannerKind::Keyscan,
            program: "ssh-keyscan".to_string(),
            timeout_secs: 5,
        }
    }
}

// ======================== known_hosts 设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KnownHostsSettings {
    /// 删除旧记录前保留 known_hosts.old
    pub keep_backup: bool,
}

impl Default for KnownHostsSettings {
    fn default() -> Self {
        Self { keep_backup: true }
    }
}
