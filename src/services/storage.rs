// 本地配置持久化服务

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::BootstrapSettings;

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/trustboot
/// Linux: ~/.config/trustboot
/// Windows: C:\Users\<用户名>\AppData\Roaming\trustboot
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("trustboot");
    Ok(config_dir)
}

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 默认 known_hosts 路径 (~/.ssh/known_hosts)
pub fn default_known_hosts() -> Result<PathBuf> {
    Ok(ssh_dir()?.join("known_hosts"))
}

/// 默认私钥路径 (~/.ssh/id_ecdsa)
pub fn default_private_key() -> Result<PathBuf> {
    Ok(ssh_dir()?.join("id_ecdsa"))
}

fn ssh_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir().context("无法获取用户主目录")?.join(".ssh"))
}

/// 加载设置（默认位置，文件不存在时使用默认值）
pub fn load_settings() -> Result<BootstrapSettings> {
    load_settings_from(&get_settings_file()?)
}

/// 从指定文件加载设置
pub fn load_settings_from(path: &Path) -> Result<BootstrapSettings> {
    if !path.exists() {
        return Ok(BootstrapSettings::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("无法读取设置文件 {:?}", path))?;
    let settings: BootstrapSettings =
        serde_json::from_str(&content).with_context(|| format!("无法解析设置文件 {:?}", path))?;
    Ok(settings)
}

/// 保存设置
pub fn save_settings_to(path: &Path, settings: &BootstrapSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).context("无法创建配置目录")?;
        }
    }
    let content = serde_json::to_string_pretty(settings).context("无法序列化设置")?;
    fs::write(path, content).with_context(|| format!("无法写入设置文件 {:?}", path))?;
    Ok(())
}
