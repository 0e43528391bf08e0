/// 应用配置定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Worker 轮询间隔（秒）: 1-3600
    pub poll_interval_seconds: u64,

    /// 农历换算使用的时区（小时）: -12 ~ 14
    pub lunar_time_zone: f64,

    /// SQLite 数据库路径
    pub database_path: PathBuf,

    /// 推送配置
    pub fcm: FcmSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            lunar_time_zone: 7.0,
            database_path: default_database_path(),
            fcm: FcmSettings::default(),
        }
    }
}

/// FCM 推送设置
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FcmSettings {
    pub endpoint: String,

    pub project_id: String,

    /// OAuth 访问令牌，只从配置文件或环境变量读取，不写回
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// 单次请求超时（秒）: 1-120
    pub request_timeout_seconds: u64,
}

impl Default for FcmSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://fcm.googleapis.com"),
            project_id: String::new(),
            access_token: None,
            request_timeout_seconds: 10,
        }
    }
}

impl fmt::Debug for FcmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FcmSettings")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// 默认数据库位置：<data_local_dir>/reminder-engine/reminder-engine.db
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reminder-engine")
        .join("reminder-engine.db")
}
