// 引导编排
//
// 流程：校验地址 -> 加载私钥 -> 退避重试探测直到就绪 -> 扫描主机密钥 -> 替换 known_hosts
// 每一步都在上一步完成后才开始；任何一步失败即终止，不回退到之前的阶段

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::models::settings::{BootstrapSettings, ScannerKind};

use super::backoff::{retry_notify, RetryError};
use super::config::ProbeConfig;
use super::error::BootstrapError;
use super::event::{BootstrapEvent, BootstrapStage};
use super::key::{load_credential, Credential};
use super::keyscan::{HostKeyScanner, KeyscanCommand, SshHostKeyScanner};
use super::known_hosts::TrustStore;
use super::probe::{Prober, SshProber};

/// 引导请求（来自外部编排层）
#[derive(Clone, Debug)]
pub struct BootstrapRequest {
    /// 目标地址（必须是 IPv4）
    pub address: String,
    /// 私钥文件路径
    pub private_key: PathBuf,
    /// known_hosts 路径
    pub known_hosts: PathBuf,
}

/// 解析目标地址，只接受 IPv4（含 IPv4 映射的 IPv6 写法）
pub fn parse_target(input: &str) -> Result<Ipv4Addr, BootstrapError> {
    let invalid = |reason: &str| BootstrapError::InvalidAddress {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("address is empty"));
    }

    match input.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => Ok(addr),
        Ok(IpAddr::V6(addr)) => addr
            .to_ipv4_mapped()
            .ok_or_else(|| invalid("ip was not an IPv4 address")),
        Err(_) => Err(invalid("not an IP address")),
    }
}

/// 按设置构建扫描器
pub fn scanner_from_settings(settings: &BootstrapSettings) -> Box<dyn HostKeyScanner> {
    let timeout = Duration::from_secs(settings.scanner.timeout_secs);
    match settings.scanner.kind {
        ScannerKind::Keyscan => Box::new(KeyscanCommand {
            program: settings.scanner.program.clone(),
            timeout,
        }),
        ScannerKind::Native => Box::new(SshHostKeyScanner { timeout }),
    }
}

/// 引导编排器（一次调用只针对一个地址）
pub struct Bootstrap {
    settings: BootstrapSettings,
    scanner: Box<dyn HostKeyScanner>,
    cancel: CancellationToken,
    event_sender: Option<mpsc::UnboundedSender<BootstrapEvent>>,
    stage: BootstrapStage,
    run_id: String,
}

impl Bootstrap {
    pub fn new(settings: BootstrapSettings) -> Self {
        let scanner = scanner_from_settings(&settings);
        Self {
            settings,
            scanner,
            cancel: CancellationToken::new(),
            event_sender: None,
            stage: BootstrapStage::Init,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// 替换主机密钥扫描器
    pub fn with_scanner(mut self, scanner: impl HostKeyScanner + 'static) -> Self {
        self.scanner = Box::new(scanner);
        self
    }

    /// 外部取消令牌：在每次等待和每个网络调用处检查
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 订阅引导事件
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<BootstrapEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn stage(&self) -> BootstrapStage {
        self.stage
    }

    /// 执行引导（SSH 探测）
    pub async fn run(&mut self, request: &BootstrapRequest) -> Result<(), BootstrapError> {
        let config = ProbeConfig::from(&self.settings.ssh);
        self.run_with(request, move |target, credential| {
            SshProber::new(target, credential, config)
        })
        .await
    }

    /// 执行引导，由调用方提供探测器
    pub async fn run_with<P, F>(
        &mut self,
        request: &BootstrapRequest,
        make_prober: F,
    ) -> Result<(), BootstrapError>
    where
        P: Prober,
        F: FnOnce(SocketAddrV4, Credential) -> P,
    {
        let result = self.drive(request, make_prober).await;

        match &result {
            Ok(removed_records) => {
                self.set_stage(BootstrapStage::Done);
                self.emit(BootstrapEvent::Completed {
                    removed_records: *removed_records,
                });
                info!(
                    "[Bootstrap] [{}] {} is ready and trusted",
                    self.run_id, request.address
                );
            }
            Err(e) => {
                error!(
                    "[Bootstrap] [{}] Failed during '{}': {}",
                    self.run_id,
                    self.stage.label_en(),
                    e
                );
                self.set_stage(BootstrapStage::Failed);
                self.emit(BootstrapEvent::Failed {
                    error: e.to_string(),
                });
            }
        }

        result.map(|_| ())
    }

    async fn drive<P, F>(
        &mut self,
        request: &BootstrapRequest,
        make_prober: F,
    ) -> Result<usize, BootstrapError>
    where
        P: Prober,
        F: FnOnce(SocketAddrV4, Credential) -> P,
    {
        self.set_stage(BootstrapStage::Init);
        let target = parse_target(&request.address)?;
        let port = self.settings.ssh.port;

        self.set_stage(BootstrapStage::LoadingCredential);
        let passphrase = self.settings.ssh.passphrase();
        let credential = load_credential(&request.private_key, passphrase.as_deref()).await?;

        self.set_stage(BootstrapStage::AwaitingReadiness);
        let prober = make_prober(SocketAddrV4::new(target, port), credential);
        let attempts = self.await_readiness(target, &prober).await?;
        self.emit(BootstrapEvent::Ready { attempts });

        self.set_stage(BootstrapStage::ScanningHostKey);
        let records = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BootstrapError::Cancelled),
            records = self.scanner.scan(target, port) => records?,
        };
        debug!(
            "[Bootstrap] Scanned {} host key record(s) for {}",
            records.len(),
            target
        );

        // 取消只在修改 known_hosts 之前生效，写入一旦开始就做完
        if self.cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled);
        }

        self.set_stage(BootstrapStage::EditingTrustStore);
        let store = TrustStore::new(&request.known_hosts)
            .with_backup(self.settings.known_hosts.keep_backup);
        let removed = store.replace(target, port, &records)?;

        Ok(removed)
    }

    /// 退避重试探测直到就绪，返回尝试次数
    async fn await_readiness<P: Prober>(
        &self,
        target: Ipv4Addr,
        prober: &P,
    ) -> Result<u32, BootstrapError> {
        let schedule = self.settings.backoff.schedule();
        let event_sender = self.event_sender.clone();
        let mut failures = 0u32;

        info!(
            "[Bootstrap] [{}] Waiting up to {}s for {} to become ready",
            self.run_id,
            schedule.max_elapsed.as_secs(),
            target
        );

        let result = retry_notify(
            &schedule,
            &self.cancel,
            || prober.probe(),
            |err, wait| {
                failures += 1;
                info!(
                    "[Bootstrap] Couldn't dial server {}: {} (retrying in {:.1}s)",
                    target,
                    err,
                    wait.as_secs_f64()
                );
                if let Some(sender) = &event_sender {
                    let next_attempt_at = chrono::Duration::from_std(wait)
                        .map(|d| chrono::Local::now() + d)
                        .unwrap_or_else(|_| chrono::Local::now());
                    let _ = sender.send(BootstrapEvent::RetryScheduled {
                        attempt: failures,
                        error: err.to_string(),
                        wait,
                        next_attempt_at,
                    });
                }
            },
        )
        .await;

        match result {
            Ok(attempts) => {
                info!(
                    "[Bootstrap] {} is ready after {} attempt(s)",
                    target, attempts
                );
                Ok(attempts)
            }
            Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last,
            }) => Err(BootstrapError::ReadinessTimeout {
                attempts,
                elapsed,
                last,
            }),
            Err(RetryError::Cancelled { .. }) => Err(BootstrapError::Cancelled),
        }
    }

    fn set_stage(&mut self, stage: BootstrapStage) {
        self.stage = stage;
        debug!("[Bootstrap] [{}] Stage: {}", self.run_id, stage.label_en());
        self.emit(BootstrapEvent::StageChanged(stage));
    }

    /// 发送事件（无订阅者时忽略）
    fn emit(&self, event: BootstrapEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    /// 同步入口：在当前线程上构建运行时并阻塞到结束
    ///
    /// 不能在 tokio 运行时内部调用（block_on 会 panic），异步调用方应使用 run
    pub fn run_blocking(&mut self, request: &BootstrapRequest) -> Result<(), BootstrapError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(BootstrapError::Runtime)?;
        runtime.block_on(self.run(request))
    }
}
