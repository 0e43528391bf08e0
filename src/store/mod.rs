/// 存储接口
///
/// Worker 只依赖这些 trait，不依赖任何具体存储引擎

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::AppResult;
use crate::reminder::Reminder;

pub mod memory;

pub use memory::MemoryStore;

/// 用户
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub fcm_token: Option<String>,
    pub is_fcm_active: bool,
}

impl User {
    pub fn new(id: impl Into<String>, fcm_token: Option<String>) -> Self {
        let is_fcm_active = fcm_token.is_some();
        Self {
            id: id.into(),
            fcm_token,
            is_fcm_active,
        }
    }

    /// 可用于推送的令牌
    pub fn active_token(&self) -> Option<&str> {
        if !self.is_fcm_active {
            return None;
        }
        self.fcm_token.as_deref().filter(|token| !token.is_empty())
    }
}

/// 系统状态（单例）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemStatus {
    pub worker_enabled: bool,
    pub last_error: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            last_error: String::new(),
            updated_at: None,
        }
    }
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// 状态为 active 且 next_action_at <= now 的提醒
    async fn get_due_reminders(&self, now: DateTime<Utc>) -> AppResult<Vec<Reminder>>;
    async fn get_by_id(&self, id: &str) -> AppResult<Reminder>;
    async fn update(&self, reminder: &Reminder) -> AppResult<()>;
    async fn update_next_action_at(
        &self,
        id: &str,
        next_action_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> AppResult<User>;
    async fn disable_fcm(&self, id: &str) -> AppResult<()>;
}

#[async_trait]
pub trait SystemStatusStore: Send + Sync {
    async fn is_worker_enabled(&self) -> AppResult<bool>;
    async fn disable_worker(&self, reason: &str) -> AppResult<()>;
    async fn clear_error(&self) -> AppResult<()>;
    async fn get_status(&self) -> AppResult<SystemStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_token() {
        let user = User::new("u1", Some("token-1".to_string()));
        assert_eq!(user.active_token(), Some("token-1"));

        let disabled = User { is_fcm_active: false, ..user.clone() };
        assert_eq!(disabled.active_token(), None);

        let empty = User { fcm_token: Some(String::new()), ..user };
        assert_eq!(empty.active_token(), None);

        assert_eq!(User::new("u2", None).active_token(), None);
    }
}
