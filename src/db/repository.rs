/// SQLite 存储实现
///
/// 为 Database 实现 ReminderStore / UserStore / SystemStatusStore。
/// 时间统一存为 Unix 秒，重复规则存为 JSON 文本。

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use super::Database;
use crate::error::{AppError, AppResult};
use crate::reminder::{RecurrencePattern, Reminder};
use crate::store::{ReminderStore, SystemStatus, SystemStatusStore, User, UserStore};

const REMINDER_COLUMNS: &str = "id, user_id, title, description, type, calendar_type, status,
    recurrence_pattern, next_recurring, next_crp, crp_interval_sec, max_crp, crp_count,
    repeat_strategy, next_action_at, snooze_until, last_sent_at, last_crp_completed_at,
    last_completed_at, cycle_started_at, created_at";

fn to_ts(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.map(|t| t.timestamp())
}

fn from_ts(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 无法解析的重复规则按缺失处理，由调度计算报告错误
fn parse_pattern(id: &str, text: Option<String>) -> Option<RecurrencePattern> {
    let text = text?;
    match serde_json::from_str(&text) {
        Ok(pattern) => Some(pattern),
        Err(e) => {
            warn!("Reminder {} has an unreadable recurrence pattern: {}", id, e);
            None
        }
    }
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let id: String = row.get(0)?;
    let recurrence_pattern = parse_pattern(&id, row.get(7)?);
    let created_at = from_ts(Some(row.get(20)?)).unwrap_or_default();

    Ok(Reminder {
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        reminder_type: parse_column(row, 4)?,
        calendar_type: parse_column(row, 5)?,
        status: parse_column(row, 6)?,
        recurrence_pattern,
        next_recurring: from_ts(row.get(8)?),
        next_crp: from_ts(row.get(9)?),
        crp_interval_sec: row.get(10)?,
        max_crp: row.get(11)?,
        crp_count: row.get(12)?,
        repeat_strategy: parse_column(row, 13)?,
        next_action_at: from_ts(row.get(14)?),
        snooze_until: from_ts(row.get(15)?),
        last_sent_at: from_ts(row.get(16)?),
        last_crp_completed_at: from_ts(row.get(17)?),
        last_completed_at: from_ts(row.get(18)?),
        cycle_started_at: from_ts(row.get(19)?),
        created_at,
        id,
    })
}

impl Database {
    /// 插入或整体替换一条提醒（CRUD 层与测试使用）
    pub fn save_reminder(&self, reminder: &Reminder) -> AppResult<()> {
        reminder.validate()?;

        let pattern = reminder
            .recurrence_pattern
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_connection(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO reminders ({}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                        ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21
                    )",
                    REMINDER_COLUMNS
                ),
                params![
                    reminder.id,
                    reminder.user_id,
                    reminder.title,
                    reminder.description,
                    reminder.reminder_type.as_str(),
                    reminder.calendar_type.as_str(),
                    reminder.status.as_str(),
                    pattern,
                    to_ts(reminder.next_recurring),
                    to_ts(reminder.next_crp),
                    reminder.crp_interval_sec,
                    reminder.max_crp,
                    reminder.crp_count,
                    reminder.repeat_strategy.as_str(),
                    to_ts(reminder.next_action_at),
                    to_ts(reminder.snooze_until),
                    to_ts(reminder.last_sent_at),
                    to_ts(reminder.last_crp_completed_at),
                    to_ts(reminder.last_completed_at),
                    to_ts(reminder.cycle_started_at),
                    reminder.created_at.timestamp(),
                ],
            )?;
            Ok(())
        })
    }

    /// 插入或替换用户
    pub fn save_user(&self, user: &User) -> AppResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO users (id, fcm_token, is_fcm_active) VALUES (?1, ?2, ?3)",
                params![user.id, user.fcm_token, user.is_fcm_active],
            )?;
            Ok(())
        })
    }

    /// 运维操作：重新启用 Worker
    pub fn enable_worker(&self) -> AppResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE system_status SET worker_enabled = 1, updated_at = ?1 WHERE id = 1",
                params![Utc::now().timestamp()],
            )?;
            Ok(())
        })
    }
}

#[async_trait]
impl ReminderStore for Database {
    async fn get_due_reminders(&self, now: DateTime<Utc>) -> AppResult<Vec<Reminder>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM reminders
                 WHERE status = 'active'
                   AND next_action_at IS NOT NULL
                   AND next_action_at <= ?1
                 ORDER BY next_action_at ASC, id ASC",
                REMINDER_COLUMNS
            ))?;

            let reminders = stmt
                .query_map([now.timestamp()], reminder_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(reminders)
        })
    }

    async fn get_by_id(&self, id: &str) -> AppResult<Reminder> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM reminders WHERE id = ?1", REMINDER_COLUMNS),
                [id],
                reminder_from_row,
            )
            .optional()?
            .ok_or_else(|| AppError::not_found(2, format!("提醒不存在: {}", id)))
        })
    }

    async fn update(&self, reminder: &Reminder) -> AppResult<()> {
        let changed = self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE reminders SET
                    status = ?2, next_recurring = ?3, next_crp = ?4, crp_count = ?5,
                    next_action_at = ?6, snooze_until = ?7, last_sent_at = ?8,
                    last_crp_completed_at = ?9, last_completed_at = ?10, cycle_started_at = ?11
                 WHERE id = ?1",
                params![
                    reminder.id,
                    reminder.status.as_str(),
                    to_ts(reminder.next_recurring),
                    to_ts(reminder.next_crp),
                    reminder.crp_count,
                    to_ts(reminder.next_action_at),
                    to_ts(reminder.snooze_until),
                    to_ts(reminder.last_sent_at),
                    to_ts(reminder.last_crp_completed_at),
                    to_ts(reminder.last_completed_at),
                    to_ts(reminder.cycle_started_at),
                ],
            )?;
            Ok(changed)
        })?;

        if changed == 0 {
            return Err(AppError::not_found(2, format!("提醒不存在: {}", reminder.id)));
        }
        Ok(())
    }

    async fn update_next_action_at(
        &self,
        id: &str,
        next_action_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let changed = self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE reminders SET next_action_at = ?2 WHERE id = ?1",
                params![id, to_ts(next_action_at)],
            )?;
            Ok(changed)
        })?;

        if changed == 0 {
            return Err(AppError::not_found(2, format!("提醒不存在: {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for Database {
    async fn get_by_id(&self, id: &str) -> AppResult<User> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, fcm_token, is_fcm_active FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        fcm_token: row.get(1)?,
                        is_fcm_active: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| AppError::not_found(3, format!("用户不存在: {}", id)))
        })
    }

    async fn disable_fcm(&self, id: &str) -> AppResult<()> {
        let changed = self.with_connection(|conn| {
            let changed = conn.execute("UPDATE users SET is_fcm_active = 0 WHERE id = ?1", [id])?;
            Ok(changed)
        })?;

        if changed == 0 {
            return Err(AppError::not_found(3, format!("用户不存在: {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SystemStatusStore for Database {
    async fn is_worker_enabled(&self) -> AppResult<bool> {
        self.with_connection(|conn| {
            let enabled = conn.query_row(
                "SELECT worker_enabled FROM system_status WHERE id = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(enabled)
        })
    }

    async fn disable_worker(&self, reason: &str) -> AppResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE system_status SET worker_enabled = 0, last_error = ?1, updated_at = ?2
                 WHERE id = 1",
                params![reason, Utc::now().timestamp()],
            )?;
            Ok(())
        })
    }

    async fn clear_error(&self) -> AppResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE system_status SET last_error = '', updated_at = ?1
                 WHERE id = 1 AND last_error != ''",
                params![Utc::now().timestamp()],
            )?;
            Ok(())
        })
    }

    async fn get_status(&self) -> AppResult<SystemStatus> {
        self.with_connection(|conn| {
            let status = conn.query_row(
                "SELECT worker_enabled, last_error, updated_at FROM system_status WHERE id = 1",
                [],
                |row| {
                    Ok(SystemStatus {
                        worker_enabled: row.get(0)?,
                        last_error: row.get(1)?,
                        updated_at: from_ts(row.get(2)?),
                    })
                },
            )?;
            Ok(status)
        })
    }
}
