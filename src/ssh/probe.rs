// 就绪探测
//
// 一次探测 = 连接 + 认证 + 执行就绪命令，只观察，不持久化任何状态

use std::net::SocketAddrV4;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use super::client::SshClient;
use super::config::ProbeConfig;
use super::error::ProbeError;
use super::key::Credential;

/// 单次就绪探测
#[async_trait]
pub trait Prober: Send + Sync {
    /// 执行恰好一次探测
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// 基于 SSH 的就绪探测器
pub struct SshProber {
    target: SocketAddrV4,
    client: SshClient,
    config: ProbeConfig,
}

impl SshProber {
    pub fn new(target: SocketAddrV4, credential: Credential, config: ProbeConfig) -> Self {
        Self {
            target,
            client: SshClient::new(config.clone(), credential),
            config,
        }
    }
}

#[async_trait]
impl Prober for SshProber {
    async fn probe(&self) -> Result<(), ProbeError> {
        let session = self.client.connect(self.target).await?;

        let command = self.config.readiness_command.as_str();
        let result = match session.open_exec().await {
            Ok(channel) => timeout(self.config.command_timeout(), channel.exec(command))
                .await
                .map_err(|_| ProbeError::Timeout(self.config.command_timeout))
                .and_then(|r| r),
            Err(e) => Err(e),
        };

        // 会话无论成败都要关闭；关闭失败不影响探测结论
        if let Err(e) = session.close().await {
            debug!("[Probe] Failed to close session to {}: {}", session.host(), e);
        }

        let output = result?;
        if output.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Command {
                command: command.to_string(),
                status: output.exit_status,
                output: output.trimmed_output(),
            })
        }
    }
}
