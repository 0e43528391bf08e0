/// 应用设置管理模块
///
/// 从 YAML 文件加载，环境变量覆盖文件中的值

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub mod config;
pub use config::{default_database_path, AppSettings, FcmSettings};

pub const ENV_DB_PATH: &str = "REMINDER_DB_PATH";
pub const ENV_POLL_INTERVAL: &str = "REMINDER_POLL_INTERVAL";
pub const ENV_FCM_PROJECT_ID: &str = "FCM_PROJECT_ID";
pub const ENV_FCM_ACCESS_TOKEN: &str = "FCM_ACCESS_TOKEN";
pub const ENV_FCM_ENDPOINT: &str = "FCM_ENDPOINT";

/// 设置管理器
pub struct SettingsManager {
    settings: Arc<Mutex<AppSettings>>,
}

impl SettingsManager {
    /// 创建新的设置管理器
    pub fn new() -> Self {
        Self {
            settings: Arc::new(Mutex::new(AppSettings::default())),
        }
    }

    /// 从配置加载设置
    pub fn with_settings(settings: AppSettings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
        }
    }

    /// 从 YAML 文件加载，文件不存在时使用默认值，随后应用环境变量覆盖
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?
        } else {
            info!("Settings file {} not found, using defaults", path.display());
            AppSettings::default()
        };

        apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;

        let manager = Self::new();
        manager.update(settings)?;
        Ok(manager)
    }

    fn lock(&self) -> MutexGuard<'_, AppSettings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取当前设置的副本
    pub fn get(&self) -> AppSettings {
        self.lock().clone()
    }

    /// 更新设置
    pub fn update(&self, new_settings: AppSettings) -> Result<()> {
        self.validate_settings(&new_settings)?;
        *self.lock() = new_settings;
        Ok(())
    }

    /// 验证设置
    fn validate_settings(&self, settings: &AppSettings) -> Result<()> {
        if settings.poll_interval_seconds < 1 || settings.poll_interval_seconds > 3600 {
            anyhow::bail!("轮询间隔必须在 1-3600 秒之间");
        }

        if !(-12.0..=14.0).contains(&settings.lunar_time_zone) {
            anyhow::bail!("农历时区必须在 -12 到 14 之间");
        }

        if settings.database_path.as_os_str().is_empty() {
            anyhow::bail!("数据库路径不能为空");
        }

        if settings.fcm.request_timeout_seconds < 1 || settings.fcm.request_timeout_seconds > 120 {
            anyhow::bail!("推送请求超时必须在 1-120 秒之间");
        }

        let endpoint = settings.fcm.endpoint.as_str();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            anyhow::bail!("推送地址必须以 http:// 或 https:// 开头");
        }

        Ok(())
    }

    /// 获取轮询间隔
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.lock().poll_interval_seconds)
    }

    /// 获取数据库路径
    pub fn database_path(&self) -> PathBuf {
        self.lock().database_path.clone()
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 环境变量覆盖
///
/// `lookup` 便于测试时注入变量表
pub fn apply_env_overrides<F>(settings: &mut AppSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DB_PATH) {
        settings.database_path = PathBuf::from(path);
    }

    if let Some(interval) = lookup(ENV_POLL_INTERVAL) {
        settings.poll_interval_seconds = interval
            .trim()
            .parse()
            .with_context(|| format!("{} 必须是有效的秒数", ENV_POLL_INTERVAL))?;
    }

    if let Some(project_id) = lookup(ENV_FCM_PROJECT_ID) {
        settings.fcm.project_id = project_id;
    }

    if let Some(token) = lookup(ENV_FCM_ACCESS_TOKEN) {
        settings.fcm.access_token = Some(token);
    }

    if let Some(endpoint) = lookup(ENV_FCM_ENDPOINT) {
        settings.fcm.endpoint = endpoint;
    }

    Ok(())
}

/// 默认配置文件位置：<config_dir>/reminder-engine/settings.yaml
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reminder-engine")
        .join("settings.yaml")
}
