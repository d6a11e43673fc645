// SSH 引导模块
//
// 模块结构:
// - config: 探测配置 (ProbeConfig)
// - error: 错误类型 (CredentialError, ProbeError, ScanError, TrustStoreError, BootstrapError)
// - event: 引导事件 (BootstrapEvent, BootstrapStage)
// - key: 私钥加载 (Credential)
// - handler: russh Handler 实现
// - client: SSH 客户端核心（连接 + 认证）
// - session: SSH 会话与执行通道
// - probe: 就绪探测 (Prober, SshProber)
// - backoff: 指数退避重试
// - keyscan: 主机密钥扫描 (HostKeyScanner)
// - known_hosts: known_hosts 编辑 (TrustStore)
// - bootstrap: 引导编排 (Bootstrap)

pub mod backoff;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod key;
pub mod keyscan;
pub mod known_hosts;
pub mod probe;
pub mod session;

// 公开导出
pub use backoff::{retry_notify, BackoffSchedule, BackoffState, RetryError, Step};
pub use bootstrap::{parse_target, scanner_from_settings, Bootstrap, BootstrapRequest};
pub use client::SshClient;
pub use config::ProbeConfig;
pub use error::{BootstrapError, CredentialError, ProbeError, ScanError, TrustStoreError};
pub use event::{BootstrapEvent, BootstrapStage};
pub use key::{load_credential, Credential};
pub use keyscan::{HostKeyRecords, HostKeyScanner, KeyscanCommand, SshHostKeyScanner};
pub use known_hosts::TrustStore;
pub use probe::{Prober, SshProber};
pub use session::{CommandOutput, ExecChannel, SshSession};
