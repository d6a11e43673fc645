// SSH 探测配置

use std::time::Duration;

use crate::models::settings::SshSettings;

/// 就绪探测配置
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 就绪检查命令（容器运行时可用时才会成功）
    pub readiness_command: String,
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 命令执行超时（秒）
    pub command_timeout: u64,
}

impl From<&SshSettings> for ProbeConfig {
    fn from(settings: &SshSettings) -> Self {
        Self {
            port: settings.port,
            username: settings.username.clone(),
            readiness_command: settings.readiness_command.clone(),
            connect_timeout: settings.connect_timeout_secs,
            command_timeout: settings.command_timeout_secs,
        }
    }
}

/// russh 客户端配置构建
impl ProbeConfig {
    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 探测连接是短连接，不需要心跳；用不活动超时兜底挂起的会话
        config.inactivity_timeout = Some(Duration::from_secs(
            self.connect_timeout.max(self.command_timeout),
        ));
        config
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}
