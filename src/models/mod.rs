// 数据模型模块

pub mod settings;

pub use settings::{
    BackoffSettings, BootstrapSettings, KnownHostsSettings, ScannerKind, ScannerSettings,
    SshSettings,
};
