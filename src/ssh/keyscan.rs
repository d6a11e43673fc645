// 主机密钥扫描
//
// 默认调用 ssh-keyscan；也提供纯 Rust 实现（一次 SSH 握手，记录服务器出示的公钥）

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PublicKeyBase64;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::error::ScanError;
use super::handler::KeyCaptureHandler;

/// known_hosts 原生格式的主机密钥记录（每行一条）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostKeyRecords {
    lines: Vec<String>,
}

impl HostKeyRecords {
    /// 从扫描输出中提取记录行，丢弃注释与空行
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 追加写入用的字节（每行以换行结尾）
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// known_hosts 中的主机名写法：22 端口直接写地址，否则写 [addr]:port
pub fn known_hosts_name(target: Ipv4Addr, port: u16) -> String {
    if port == 22 {
        target.to_string()
    } else {
        format!("[{}]:{}", target, port)
    }
}

/// 主机密钥扫描器
#[async_trait]
pub trait HostKeyScanner: Send + Sync {
    /// 查询目标当前出示的主机密钥
    async fn scan(&self, target: Ipv4Addr, port: u16) -> Result<HostKeyRecords, ScanError>;
}

/// 调用外部 ssh-keyscan（仅 IPv4）
#[derive(Clone, Debug)]
pub struct KeyscanCommand {
    /// 程序路径
    pub program: String,
    /// 单个主机的超时
    pub timeout: Duration,
}

#[async_trait]
impl HostKeyScanner for KeyscanCommand {
    async fn scan(&self, target: Ipv4Addr, port: u16) -> Result<HostKeyRecords, ScanError> {
        let secs = self.timeout.as_secs().max(1);

        let mut command = Command::new(&self.program);
        command
            .arg("-4")
            .arg("-T")
            .arg(secs.to_string())
            .arg("-p")
            .arg(port.to_string())
            .arg(target.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("[Keyscan] Running {} for {}:{}", self.program, target, port);

        // ssh-keyscan 自身有超时；外层再留一点余量防止挂死
        let output = timeout(Duration::from_secs(secs * 2 + 1), command.output())
            .await
            .map_err(|_| ScanError::Timeout(secs))?
            .map_err(|source| ScanError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ScanError::Failed {
                status: output.status.code(),
                stderr,
            });
        }

        let records = HostKeyRecords::parse(&String::from_utf8_lossy(&output.stdout));
        if records.is_empty() {
            return Err(ScanError::NoRecords {
                target: known_hosts_name(target, port),
                diagnostic: if stderr.is_empty() {
                    "no output".to_string()
                } else {
                    stderr
                },
            });
        }

        debug!("[Keyscan] Got {} host key record(s)", records.len());
        Ok(records)
    }
}

/// 纯 Rust 扫描器：完成密钥交换，记录服务器公钥后中止握手
///
/// 只能拿到服务器按 russh 默认偏好协商出的那一种密钥
#[derive(Clone, Debug)]
pub struct SshHostKeyScanner {
    pub timeout: Duration,
}

#[async_trait]
impl HostKeyScanner for SshHostKeyScanner {
    async fn scan(&self, target: Ipv4Addr, port: u16) -> Result<HostKeyRecords, ScanError> {
        let secs = self.timeout.as_secs().max(1);
        let addr = SocketAddrV4::new(target, port);

        let stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ScanError::Timeout(secs))?
            .map_err(|e| match e.kind() {
                io::ErrorKind::ConnectionRefused => ScanError::Refused(addr.to_string()),
                _ => ScanError::Protocol(e.to_string()),
            })?;

        let captured = Arc::new(Mutex::new(None));
        let handler = KeyCaptureHandler::new(captured.clone());
        let config = Arc::new(russh::client::Config::default());

        // Handler 拒绝了密钥，握手必然以错误结束；只关心是否捕获到公钥
        let handshake = timeout(
            self.timeout,
            russh::client::connect_stream(config, stream, handler),
        )
        .await
        .map_err(|_| ScanError::Timeout(secs))?;

        let key = captured.lock().ok().and_then(|mut slot| slot.take());
        let key = match (key, handshake) {
            (Some(key), _) => key,
            (None, Err(e)) => return Err(ScanError::Protocol(e.to_string())),
            (None, Ok(_)) => {
                return Err(ScanError::Protocol(
                    "handshake finished without a host key".to_string(),
                ))
            }
        };

        let line = format!(
            "{} {} {}",
            known_hosts_name(target, port),
            key.algorithm().as_str(),
            key.public_key_base64()
        );
        debug!("[Keyscan] Captured {} key for {}", key.algorithm(), addr);
        Ok(HostKeyRecords::parse(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drops_comments_and_blank_lines() {
        let output = "# 203.0.113.10:22 SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.1\n\
                      203.0.113.10 ssh-rsa AAAAB3Nza\n\
                      \n\
                      203.0.113.10 ssh-ed25519 AAAAC3Nza\n";
        let records = HostKeyRecords::parse(output);
        assert_eq!(
            records.lines(),
            &[
                "203.0.113.10 ssh-rsa AAAAB3Nza".to_string(),
                "203.0.113.10 ssh-ed25519 AAAAC3Nza".to_string()
            ]
        );
        assert_eq!(
            records.to_bytes(),
            b"203.0.113.10 ssh-rsa AAAAB3Nza\n203.0.113.10 ssh-ed25519 AAAAC3Nza\n".to_vec()
        );
    }

    #[test]
    fn test_known_hosts_name() {
        assert_eq!(known_hosts_name(Ipv4Addr::new(10, 0, 0, 5), 22), "10.0.0.5");
        assert_eq!(
            known_hosts_name(Ipv4Addr::new(10, 0, 0, 5), 2222),
            "[10.0.0.5]:2222"
        );
    }

    #[tokio::test]
    async fn test_keyscan_missing_program() {
        let scanner = KeyscanCommand {
            program: "/nonexistent/ssh-keyscan".to_string(),
            timeout: Duration::from_secs(1),
        };
        let err = scanner
            .scan(Ipv4Addr::new(127, 0, 0, 1), 22)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_native_scanner_refused() {
        // 绑定后立即释放，端口大概率无人监听
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let scanner = SshHostKeyScanner {
            timeout: Duration::from_secs(2),
        };
        let err = scanner
            .scan(Ipv4Addr::new(127, 0, 0, 1), port)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Refused(_)));
    }
}
