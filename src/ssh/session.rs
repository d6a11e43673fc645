// SSH 会话管理
// 认证成功后的会话对象，探测只需要执行单个命令

use std::sync::Arc;

use russh::client::{Handle, Msg};
use russh::{ChannelMsg, Disconnect};
use tracing::debug;

use super::error::ProbeError;
use super::handler::ProbeHandler;

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// SSH 会话（认证成功后）
pub struct SshSession {
    /// 共享的 russh Handle
    handle: Arc<Handle<ProbeHandler>>,
    /// 服务器地址
    host: String,
}

impl SshSession {
    /// 创建新的会话
    pub fn new(handle: Handle<ProbeHandler>, host: String) -> Self {
        Self {
            handle: Arc::new(handle),
            host,
        }
    }

    /// 获取主机地址
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 打开执行通道
    pub async fn open_exec(&self) -> Result<ExecChannel, ProbeError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ProbeError::Channel(e.to_string()))?;

        Ok(ExecChannel::new(channel))
    }

    /// 关闭会话
    pub async fn close(&self) -> Result<(), ProbeError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(ProbeError::from)
    }
}

/// 执行通道（一次性执行单个命令）
pub struct ExecChannel {
    channel: RusshChannel,
}

impl ExecChannel {
    fn new(channel: RusshChannel) -> Self {
        Self { channel }
    }

    /// 执行命令并收集合并后的输出
    ///
    /// 退出码可能在 EOF 之后才到达，所以一直读到通道关闭
    pub async fn exec(mut self, command: &str) -> Result<CommandOutput, ProbeError> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| ProbeError::Channel(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = None;

        while let Some(channel_msg) = self.channel.wait().await {
            match channel_msg {
                ChannelMsg::Data { data } => {
                    output.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, .. } => {
                    output.extend_from_slice(&data);
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                }
                ChannelMsg::Failure => {
                    return Err(ProbeError::Channel(format!(
                        "server refused to execute `{}`",
                        command
                    )));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        debug!(
            "[Session] `{}` finished with exit status {:?}",
            command, exit_status
        );

        Ok(CommandOutput {
            output,
            exit_status,
        })
    }
}

/// 命令输出
#[derive(Debug)]
pub struct CommandOutput {
    /// 标准输出与标准错误（按到达顺序合并）
    pub output: Vec<u8>,
    /// 退出码（服务器未返回时为 None）
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// 获取去掉首尾空白的输出字符串
    pub fn trimmed_output(&self) -> String {
        String::from_utf8_lossy(&self.output).trim().to_string()
    }

    /// 检查命令是否成功（必须明确返回 0）
    pub fn is_success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success_requires_exit_status() {
        let missing = CommandOutput {
            output: b"ok".to_vec(),
            exit_status: None,
        };
        assert!(!missing.is_success());

        let zero = CommandOutput {
            output: Vec::new(),
            exit_status: Some(0),
        };
        assert!(zero.is_success());
    }

    #[test]
    fn test_trimmed_output() {
        let out = CommandOutput {
            output: b"\n  Cannot connect to the Docker daemon\n".to_vec(),
            exit_status: Some(1),
        };
        assert_eq!(out.trimmed_output(), "Cannot connect to the Docker daemon");
    }
}
