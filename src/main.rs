// trustboot - 命令行入口

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use trustboot::models::{BootstrapSettings, ScannerKind};
use trustboot::services::storage;
use trustboot::ssh::{Bootstrap, BootstrapRequest};

/// 等待新建主机 SSH 就绪，然后用新扫描的主机密钥替换 known_hosts 中的旧记录
#[derive(Parser, Debug)]
#[command(name = "trustboot", version)]
struct Args {
    /// 目标主机 IPv4 地址
    address: String,

    /// 私钥路径（默认 ~/.ssh/id_ecdsa）
    #[arg(short = 'i', long)]
    identity: Option<PathBuf>,

    /// known_hosts 路径（默认 ~/.ssh/known_hosts）
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// 设置文件（默认 <配置目录>/trustboot/settings.json）
    #[arg(long)]
    config: Option<PathBuf>,

    /// SSH 用户名
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// SSH 端口
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// 就绪检查命令
    #[arg(long)]
    command: Option<String>,

    /// 最长等待时间（秒）
    #[arg(long)]
    max_wait: Option<u64>,

    /// 主机密钥扫描方式
    #[arg(long, value_parser = parse_scanner)]
    scanner: Option<ScannerKind>,

    /// 不保留 known_hosts.old
    #[arg(long)]
    no_backup: bool,
}

fn parse_scanner(value: &str) -> Result<ScannerKind, String> {
    match value {
        "keyscan" => Ok(ScannerKind::Keyscan),
        "native" => Ok(ScannerKind::Native),
        other => Err(format!("unknown scanner '{}', expected keyscan or native", other)),
    }
}

/// 命令行参数覆盖设置文件
fn apply_overrides(settings: &mut BootstrapSettings, args: &Args) {
    if let Some(user) = &args.user {
        settings.ssh.username = user.clone();
    }
    if let Some(port) = args.port {
        settings.ssh.port = port;
    }
    if let Some(command) = &args.command {
        settings.ssh.readiness_command = command.clone();
    }
    if let Some(max_wait) = args.max_wait {
        settings.backoff.max_elapsed_secs = max_wait;
    }
    if let Some(scanner) = args.scanner {
        settings.scanner.kind = scanner;
    }
    if args.no_backup {
        settings.known_hosts.keep_backup = false;
    }
}

async fn run(args: Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => storage::load_settings_from(path)?,
        None => storage::load_settings()?,
    };
    apply_overrides(&mut settings, &args);

    let request = BootstrapRequest {
        address: args.address.clone(),
        private_key: match &args.identity {
            Some(path) => path.clone(),
            None => storage::default_private_key()?,
        },
        known_hosts: match &args.known_hosts {
            Some(path) => path.clone(),
            None => storage::default_known_hosts()?,
        },
    };

    // Ctrl-C 取消：在下一次等待或网络调用处终止
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[trustboot] Interrupted, cancelling...");
            cancel_on_signal.cancel();
        }
    });

    let mut bootstrap = Bootstrap::new(settings).with_cancellation(cancel);
    bootstrap
        .run(&request)
        .await
        .with_context(|| format!("无法为 {} 建立主机信任", request.address))?;
    Ok(())
}

fn main() -> ExitCode {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug trustboot 203.0.113.10
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false) // 不显示 target（模块路径）
        .init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
