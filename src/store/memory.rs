/// 内存存储
///
/// 同时实现三个存储 trait，并记录每一次调用，便于排查和测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use crate::error::{AppError, AppResult};
use crate::reminder::{Reminder, ReminderStatus};
use super::{ReminderStore, SystemStatus, SystemStatusStore, User, UserStore};

/// 存储调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    GetDueReminders,
    GetReminder(String),
    UpdateReminder(String),
    UpdateNextActionAt(String, Option<DateTime<Utc>>),
    GetUser(String),
    DisableFcm(String),
    IsWorkerEnabled,
    DisableWorker(String),
    ClearError,
    GetStatus,
}

#[derive(Default)]
struct State {
    reminders: Vec<Reminder>,
    users: Vec<User>,
    status: SystemStatus,
    calls: Vec<StoreCall>,
    fail_due_fetch: Option<String>,
    fail_status_read: Option<String>,
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::system(20, "内存存储锁已损坏"))
    }

    pub fn insert_reminder(&self, reminder: Reminder) -> AppResult<()> {
        let mut state = self.lock()?;
        state.reminders.retain(|r| r.id != reminder.id);
        state.reminders.push(reminder);
        Ok(())
    }

    pub fn insert_user(&self, user: User) -> AppResult<()> {
        let mut state = self.lock()?;
        state.users.retain(|u| u.id != user.id);
        state.users.push(user);
        Ok(())
    }

    pub fn set_worker_enabled(&self, enabled: bool) -> AppResult<()> {
        self.lock()?.status.worker_enabled = enabled;
        Ok(())
    }

    /// 之后的到期查询都返回系统级错误
    pub fn fail_due_fetch(&self, message: impl Into<String>) -> AppResult<()> {
        self.lock()?.fail_due_fetch = Some(message.into());
        Ok(())
    }

    /// 之后的 Worker 开关读取都返回系统级错误
    pub fn fail_status_read(&self, message: impl Into<String>) -> AppResult<()> {
        self.lock()?.fail_status_read = Some(message.into());
        Ok(())
    }

    /// 不记录调用的快照读取
    pub fn reminder(&self, id: &str) -> Option<Reminder> {
        let state = self.lock().ok()?;
        state.reminders.iter().find(|r| r.id == id).cloned()
    }

    pub fn user(&self, id: &str) -> Option<User> {
        let state = self.lock().ok()?;
        state.users.iter().find(|u| u.id == id).cloned()
    }

    pub fn status(&self) -> SystemStatus {
        self.lock().map(|s| s.status.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.lock() {
            state.calls.clear();
        }
    }
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn get_due_reminders(&self, now: DateTime<Utc>) -> AppResult<Vec<Reminder>> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::GetDueReminders);
        if let Some(message) = &state.fail_due_fetch {
            return Err(AppError::system(21, message.clone()));
        }

        let mut due: Vec<Reminder> = state
            .reminders
            .iter()
            .filter(|r| r.status == ReminderStatus::Active)
            .filter(|r| r.next_action_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_action_at);
        Ok(due)
    }

    async fn get_by_id(&self, id: &str) -> AppResult<Reminder> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::GetReminder(id.to_string()));
        state
            .reminders
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(2, format!("提醒不存在: {}", id)))
    }

    async fn update(&self, reminder: &Reminder) -> AppResult<()> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::UpdateReminder(reminder.id.clone()));
        let slot = state
            .reminders
            .iter_mut()
            .find(|r| r.id == reminder.id)
            .ok_or_else(|| AppError::not_found(2, format!("提醒不存在: {}", reminder.id)))?;
        *slot = reminder.clone();
        Ok(())
    }

    async fn update_next_action_at(
        &self,
        id: &str,
        next_action_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut state = self.lock()?;
        state
            .calls
            .push(StoreCall::UpdateNextActionAt(id.to_string(), next_action_at));
        let slot = state
            .reminders
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::not_found(2, format!("提醒不存在: {}", id)))?;
        slot.next_action_at = next_action_at;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_id(&self, id: &str) -> AppResult<User> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::GetUser(id.to_string()));
        state
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| AppError::not_found(3, format!("用户不存在: {}", id)))
    }

    async fn disable_fcm(&self, id: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::DisableFcm(id.to_string()));
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::not_found(3, format!("用户不存在: {}", id)))?;
        user.is_fcm_active = false;
        Ok(())
    }
}

#[async_trait]
impl SystemStatusStore for MemoryStore {
    async fn is_worker_enabled(&self) -> AppResult<bool> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::IsWorkerEnabled);
        if let Some(message) = &state.fail_status_read {
            return Err(AppError::system(22, message.clone()));
        }
        Ok(state.status.worker_enabled)
    }

    async fn disable_worker(&self, reason: &str) -> AppResult<()> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::DisableWorker(reason.to_string()));
        state.status.worker_enabled = false;
        state.status.last_error = reason.to_string();
        state.status.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn clear_error(&self) -> AppResult<()> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::ClearError);
        state.status.last_error.clear();
        state.status.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn get_status(&self) -> AppResult<SystemStatus> {
        let mut state = self.lock()?;
        state.calls.push(StoreCall::GetStatus);
        Ok(state.status.clone())
    }
}
