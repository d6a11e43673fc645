// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;
use std::sync::{Arc, Mutex};

use russh::keys::PublicKey;
use tracing::debug;

/// 就绪探测用 Handler
///
/// 新建主机的密钥此时还不可信，探测阶段有意不校验主机密钥（首次信任缺口）。
/// 探测成功后立即由扫描 + known_hosts 替换步骤补上，不能省略那一步。
pub struct ProbeHandler {
    /// 服务器地址（用于日志）
    host: String,
}

impl ProbeHandler {
    /// 创建新的 Handler
    pub fn new(host: String) -> Self {
        Self { host }
    }
}

impl russh::client::Handler for ProbeHandler {
    type Error = russh::Error;

    /// 检查服务器公钥：只记录指纹，接受所有公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);

        debug!(
            "[Probe] {} presented {} key {} (not verified yet)",
            self.host,
            server_public_key.algorithm(),
            fingerprint
        );

        async { Ok(true) }
    }
}

/// 主机密钥捕获 Handler
///
/// 记录服务器在密钥交换中出示的公钥后拒绝继续握手
pub struct KeyCaptureHandler {
    captured: Arc<Mutex<Option<PublicKey>>>,
}

impl KeyCaptureHandler {
    pub fn new(captured: Arc<Mutex<Option<PublicKey>>>) -> Self {
        Self { captured }
    }
}

impl russh::client::Handler for KeyCaptureHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        if let Ok(mut slot) = self.captured.lock() {
            *slot = Some(server_public_key.clone());
        }
        async { Ok(false) }
    }
}
