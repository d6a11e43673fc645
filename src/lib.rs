// trustboot - 新建主机的 SSH 就绪等待与 known_hosts 主机密钥轮换
//
// 只针对单个 IPv4 地址：等到主机可以通过 SSH 登录并成功执行就绪命令，
// 再用新扫描到的主机密钥替换 known_hosts 中该地址的旧记录

pub mod models;
pub mod services;
pub mod ssh;

pub use models::BootstrapSettings;
pub use ssh::{Bootstrap, BootstrapError, BootstrapEvent, BootstrapRequest, BootstrapStage};
