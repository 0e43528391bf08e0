/// 统一错误处理系统
///
/// 提供类型安全的错误定义，以及 Worker 使用的失败分类

use thiserror::Error;

/// 应用错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 提醒字段不满足业务规则（由 CRUD 层处理）
    #[error("[ERR_VALIDATION_{0:03}] {1}")]
    Validation(u16, String),

    /// 提醒或用户不存在
    #[error("[ERR_NOT_FOUND_{0:03}] {1}")]
    NotFound(u16, String),

    /// 推送令牌永久失效
    #[error("[ERR_TOKEN_INVALID_{0:03}] {1}")]
    TokenInvalid(u16, String),

    /// 系统级错误（超时、基础设施故障）
    #[error("[ERR_SYSTEM_{0:03}] {1}")]
    System(u16, String),

    /// 调度计算错误
    #[error("[ERR_CALCULATION_{0:03}] {1}")]
    Calculation(u16, String),

    /// 数据库相关错误
    #[error("[ERR_DATABASE_{0:03}] {1}")]
    Database(u16, String),

    /// 网络相关错误
    #[error("[ERR_NETWORK_{0:03}] {1}")]
    Network(u16, String),

    /// 设置相关错误
    #[error("[ERR_SETTINGS_{0:03}] {1}")]
    Settings(u16, String),

    /// IO 相关错误
    #[error("[ERR_IO_{0:03}] {1}")]
    IO(u16, String),

    /// 序列化/反序列化错误
    #[error("[ERR_SERDE_{0:03}] {1}")]
    Serde(u16, String),
}

/// Worker 视角下的失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 单条提醒跳过，周期继续
    NotFound,
    /// 停用该用户的推送，周期继续
    TokenInvalid,
    /// 单条提醒跳过，周期继续
    Calculation,
    /// 停用 Worker 并立即结束本周期
    System,
}

impl AppError {
    pub fn validation(code: u16, msg: impl Into<String>) -> Self {
        Self::Validation(code, msg.into())
    }

    pub fn not_found(code: u16, msg: impl Into<String>) -> Self {
        Self::NotFound(code, msg.into())
    }

    pub fn token_invalid(code: u16, msg: impl Into<String>) -> Self {
        Self::TokenInvalid(code, msg.into())
    }

    pub fn system(code: u16, msg: impl Into<String>) -> Self {
        Self::System(code, msg.into())
    }

    pub fn calculation(code: u16, msg: impl Into<String>) -> Self {
        Self::Calculation(code, msg.into())
    }

    pub fn database(code: u16, msg: impl Into<String>) -> Self {
        Self::Database(code, msg.into())
    }

    pub fn network(code: u16, msg: impl Into<String>) -> Self {
        Self::Network(code, msg.into())
    }

    pub fn settings(code: u16, msg: impl Into<String>) -> Self {
        Self::Settings(code, msg.into())
    }

    pub fn io(code: u16, msg: impl Into<String>) -> Self {
        Self::IO(code, msg.into())
    }

    pub fn serde(code: u16, msg: impl Into<String>) -> Self {
        Self::Serde(code, msg.into())
    }

    /// 失败分类
    ///
    /// 未被识别为 NotFound / TokenInvalid / Calculation 的错误一律视为系统级
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::NotFound(..) => FailureKind::NotFound,
            Self::TokenInvalid(..) => FailureKind::TokenInvalid,
            Self::Calculation(..) | Self::Validation(..) => FailureKind::Calculation,
            Self::System(..)
            | Self::Database(..)
            | Self::Network(..)
            | Self::Settings(..)
            | Self::IO(..)
            | Self::Serde(..) => FailureKind::System,
        }
    }
}

/// 从标准 IO 错误转换
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::io(1, "文件或目录不存在"),
            std::io::ErrorKind::TimedOut => Self::system(1, format!("IO 超时: {}", err)),
            _ => Self::io(999, format!("IO 错误: {}", err)),
        }
    }
}

/// 从 serde_json 错误转换
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::serde(1, format!("JSON 序列化错误: {}", err))
    }
}

/// 从 reqwest 错误转换
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::system(2, "请求超时")
        } else if err.is_connect() {
            Self::system(3, "网络连接失败")
        } else if let Some(status) = err.status() {
            Self::network(status.as_u16(), format!("HTTP 错误: {}", status))
        } else {
            Self::network(999, format!("网络错误: {}", err))
        }
    }
}

/// 从 rusqlite 错误转换
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                Self::database(1, format!("数据库错误: {}", msg))
            }
            rusqlite::Error::QueryReturnedNoRows => Self::not_found(1, "查询未返回结果"),
            _ => Self::database(999, format!("数据库错误: {}", err)),
        }
    }
}

/// 应用 Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
