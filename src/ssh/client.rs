// SSH 客户端核心实现

use std::net::SocketAddrV4;
use std::sync::Arc;

use russh::client::{AuthResult, Handle};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::config::ProbeConfig;
use super::error::ProbeError;
use super::handler::ProbeHandler;
use super::key::Credential;
use super::session::SshSession;

/// SSH 客户端
/// 负责建立 SSH 连接、完成公钥认证并返回 SshSession
pub struct SshClient {
    /// 连接配置
    config: ProbeConfig,
    /// 认证私钥
    credential: Credential,
}

impl SshClient {
    /// 创建新的 SSH 客户端
    pub fn new(config: ProbeConfig, credential: Credential) -> Self {
        Self { config, credential }
    }

    /// 执行连接（异步）
    pub async fn connect(&self, target: SocketAddrV4) -> Result<SshSession, ProbeError> {
        debug!("[SSH] Connecting to {}@{}...", self.config.username, target);

        // TCP 连接
        let connect_timeout = self.config.connect_timeout();
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| ProbeError::Timeout(self.config.connect_timeout))?
            .map_err(|e| ProbeError::Dial(e.to_string()))?;

        // SSH 握手
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler = ProbeHandler::new(target.to_string());

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.config.connect_timeout))?
        .map_err(ProbeError::from)?;

        debug!("[SSH] Handshake with {} completed", target);

        // 认证
        timeout(connect_timeout, self.authenticate(&mut handle))
            .await
            .map_err(|_| ProbeError::Timeout(self.config.connect_timeout))??;

        debug!("[SSH] Authenticated as '{}'", self.config.username);

        Ok(SshSession::new(handle, target.to_string()))
    }

    /// 公钥认证
    async fn authenticate(&self, handle: &mut Handle<ProbeHandler>) -> Result<(), ProbeError> {
        // RSA 密钥需要协商签名哈希，其余算法忽略该值
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(ProbeError::from)?
            .flatten();

        let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(self.credential.key(), hash_alg);

        let auth_result = handle
            .authenticate_publickey(&self.config.username, key_with_alg)
            .await
            .map_err(|e| ProbeError::Auth(e.to_string()))?;

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(ProbeError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                Err(ProbeError::Auth(format!(
                    "Public key authentication failed. Server suggests: {:?}",
                    remaining_methods
                )))
            }
        }
    }
}
