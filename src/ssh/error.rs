// 引导流程错误类型定义
//
// 每个阶段一个错误类型，BootstrapError 负责汇总，并通过 source() 保留底层原因

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 私钥加载错误（致命，不重试）
#[derive(Debug, Error)]
pub enum CredentialError {
    /// 读取私钥文件失败
    #[error("Failed to read private key file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 私钥格式无法解析
    #[error("Failed to parse private key {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

/// 单次探测失败（瞬时错误，由退避重试器吸收）
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// TCP 连接失败
    #[error("Failed to dial new VM: {0}")]
    Dial(String),

    /// 连接或命令超时
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// SSH 协议错误（握手、密钥交换等）
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 通道错误
    #[error("Failed to create SSH session: {0}")]
    Channel(String),

    /// 就绪命令退出码非零（或未返回退出码）
    #[error("Failed to run `{command}` (exit status {}): ({output})", fmt_status(.status))]
    Command {
        command: String,
        status: Option<u32>,
        output: String,
    },
}

fn fmt_status(status: &Option<u32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

fn fmt_exit_code(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl From<russh::Error> for ProbeError {
    fn from(e: russh::Error) -> Self {
        ProbeError::Protocol(e.to_string())
    }
}

/// 主机密钥扫描错误（致命，不在内部重试）
#[derive(Debug, Error)]
pub enum ScanError {
    /// 无法启动扫描程序
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// 扫描程序返回非零退出码
    #[error("Host key scan exited with status {}: {stderr}", fmt_exit_code(.status))]
    Failed { status: Option<i32>, stderr: String },

    /// 扫描超时
    #[error("Host key scan timed out after {0}s")]
    Timeout(u64),

    /// 目标拒绝连接
    #[error("Connection refused: {0}")]
    Refused(String),

    /// SSH 协议错误
    #[error("SSH protocol error during host key scan: {0}")]
    Protocol(String),

    /// 未获得任何主机密钥记录
    #[error("No host key records returned for {target} ({diagnostic})")]
    NoRecords { target: String, diagnostic: String },
}

/// known_hosts 编辑错误
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// 无法打开文件
    #[error("Failed to open known_hosts {path:?} for appending: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 无法读取文件
    #[error("Failed to read known_hosts {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 删除旧记录失败
    #[error("Failed to remove existing known_hosts key from {path:?}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 写入新记录失败
    #[error("Failed to write new key to known_hosts {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 关闭文件失败
    #[error("Failed to close known_hosts {path:?}: {source}")]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 多个错误（按发生顺序）
    #[error("{}", join_errors(.0))]
    Multiple(Vec<TrustStoreError>),
}

fn join_errors(errors: &[TrustStoreError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TrustStoreError {
    /// 合并清理路径上收集到的全部错误，一个都不丢弃
    pub fn combine(mut errors: Vec<TrustStoreError>) -> Result<(), TrustStoreError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(TrustStoreError::Multiple(errors)),
        }
    }

    /// 展开为错误列表（单个错误返回长度为 1 的切片视图）
    pub fn errors(&self) -> Vec<&TrustStoreError> {
        match self {
            TrustStoreError::Multiple(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}

/// 引导流程错误（对外唯一的终止结果）
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// 目标地址不是 IPv4
    #[error("Invalid target address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    /// 私钥加载失败
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// 在最长等待时间内主机未就绪
    #[error(
        "Failed to wait for server to start after {attempts} attempts ({:.1}s): {last}",
        .elapsed.as_secs_f64()
    )]
    ReadinessTimeout {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: ProbeError,
    },

    /// 主机密钥扫描失败
    #[error("Failed to get remote host key: {0}")]
    Scan(#[from] ScanError),

    /// known_hosts 更新失败
    #[error("Failed to replace known_hosts key: {0}")]
    TrustStore(#[from] TrustStoreError),

    /// 引导被取消
    #[error("Bootstrap cancelled")]
    Cancelled,

    /// 无法创建异步运行时（仅同步入口）
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}
