// 引导事件定义

use std::time::Duration;

use chrono::{DateTime, Local};

/// 引导事件（供调用方展示进度，区分"在等待"与"卡死"）
#[derive(Clone, Debug)]
pub enum BootstrapEvent {
    /// 阶段变化
    StageChanged(BootstrapStage),
    /// 一次探测失败，将在 wait 之后重试
    RetryScheduled {
        attempt: u32,
        error: String,
        wait: Duration,
        next_attempt_at: DateTime<Local>,
    },
    /// 主机已就绪
    Ready { attempts: u32 },
    /// 引导完成
    Completed { removed_records: usize },
    /// 引导失败
    Failed { error: String },
}

/// 引导阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapStage {
    /// 校验目标地址
    Init = 0,
    /// 加载私钥
    LoadingCredential = 1,
    /// 等待主机就绪
    AwaitingReadiness = 2,
    /// 扫描主机密钥
    ScanningHostKey = 3,
    /// 更新 known_hosts
    EditingTrustStore = 4,
    /// 完成
    Done = 5,
    /// 失败（任意阶段可达）
    Failed = 6,
}

impl BootstrapStage {
    /// 阶段名称（用于日志）
    pub fn label_en(&self) -> &'static str {
        match self {
            Self::Init => "Validating address",
            Self::LoadingCredential => "Loading credential",
            Self::AwaitingReadiness => "Waiting for server",
            Self::ScanningHostKey => "Scanning host key",
            Self::EditingTrustStore => "Updating known_hosts",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    /// 严格顺序的下一阶段；终止阶段没有下一阶段
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::LoadingCredential),
            Self::LoadingCredential => Some(Self::AwaitingReadiness),
            Self::AwaitingReadiness => Some(Self::ScanningHostKey),
            Self::ScanningHostKey => Some(Self::EditingTrustStore),
            Self::EditingTrustStore => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }
}
