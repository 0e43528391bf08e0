/// 提醒领域模型
///
/// 双层触发模型：FRP（主周期）与 CRP（周期内的重复提醒脉冲）

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use crate::error::{AppError, AppResult};

pub mod schedule;

pub use schedule::ScheduleCalculator;

/// 未知的枚举取值
#[derive(Debug, Error)]
#[error("未知取值: {0}")]
pub struct ParseEnumError(pub String);

/// 提醒类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    OneTime,
    Recurring,
}

/// 历法类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalendarType {
    #[default]
    Solar,
    Lunar,
}

/// 提醒状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    #[default]
    Active,
    Completed,
    Paused,
}

/// 重复策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepeatStrategy {
    /// FRP 到期即开始新周期
    #[default]
    None,
    /// 用户完成当前周期后才开始新周期
    CrpUntilComplete,
}

/// 重复规则类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Daily,
    Weekly,
    Monthly,
    IntervalSeconds,
    LunarLastDayOfMonth,
}

/// 间隔型重复的基准
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaseOn {
    #[default]
    Creation,
    Completion,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError(other.to_string())),
                }
            }
        }
    };
}

string_enum!(ReminderType { OneTime => "one_time", Recurring => "recurring" });
string_enum!(CalendarType { Solar => "solar", Lunar => "lunar" });
string_enum!(ReminderStatus { Active => "active", Completed => "completed", Paused => "paused" });
string_enum!(RepeatStrategy { None => "none", CrpUntilComplete => "crp_until_complete" });

/// 重复规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrencePattern {
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// 0 = 周日 … 6 = 周六
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,
    /// HH:MM（UTC）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_time_of_day: Option<String>,
    #[serde(default)]
    pub base_on: BaseOn,
}

impl RecurrencePattern {
    pub fn new(pattern_type: PatternType) -> Self {
        Self {
            pattern_type,
            day_of_week: None,
            day_of_month: None,
            interval_seconds: None,
            trigger_time_of_day: None,
            base_on: BaseOn::default(),
        }
    }

    pub fn daily(time_of_day: &str) -> Self {
        Self {
            trigger_time_of_day: Some(time_of_day.to_string()),
            ..Self::new(PatternType::Daily)
        }
    }

    pub fn weekly(day_of_week: u32, time_of_day: &str) -> Self {
        Self {
            day_of_week: Some(day_of_week),
            trigger_time_of_day: Some(time_of_day.to_string()),
            ..Self::new(PatternType::Weekly)
        }
    }

    pub fn monthly(day_of_month: u32, time_of_day: &str) -> Self {
        Self {
            day_of_month: Some(day_of_month),
            trigger_time_of_day: Some(time_of_day.to_string()),
            ..Self::new(PatternType::Monthly)
        }
    }

    pub fn interval(seconds: i64, base_on: BaseOn) -> Self {
        Self {
            interval_seconds: Some(seconds),
            base_on,
            ..Self::new(PatternType::IntervalSeconds)
        }
    }
}

/// 提醒
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub reminder_type: ReminderType,
    pub calendar_type: CalendarType,
    pub status: ReminderStatus,
    pub recurrence_pattern: Option<RecurrencePattern>,

    /// FRP：下一次主周期触发时间
    pub next_recurring: Option<DateTime<Utc>>,
    /// CRP：下一次重复脉冲时间
    pub next_crp: Option<DateTime<Utc>>,
    pub crp_interval_sec: i64,
    /// 0 表示每个周期只发送一次
    pub max_crp: u32,
    pub crp_count: u32,
    pub repeat_strategy: RepeatStrategy,
    /// Worker 轮询所依据的唯一时间
    pub next_action_at: Option<DateTime<Utc>>,

    pub snooze_until: Option<DateTime<Utc>>,

    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_crp_completed_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    /// 当前 FRP 周期的开始时间
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
        reminder_type: ReminderType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            description: String::new(),
            reminder_type,
            calendar_type: CalendarType::Solar,
            status: ReminderStatus::Active,
            recurrence_pattern: None,
            next_recurring: None,
            next_crp: None,
            crp_interval_sec: 0,
            max_crp: 0,
            crp_count: 0,
            repeat_strategy: RepeatStrategy::None,
            next_action_at: None,
            snooze_until: None,
            last_sent_at: None,
            last_crp_completed_at: None,
            last_completed_at: None,
            cycle_started_at: None,
            created_at,
        }
    }

    pub fn is_one_time(&self) -> bool {
        self.reminder_type == ReminderType::OneTime
    }

    pub fn is_recurring(&self) -> bool {
        self.reminder_type == ReminderType::Recurring
    }

    pub fn is_completed(&self) -> bool {
        self.status == ReminderStatus::Completed
    }

    /// 稍后提醒是否仍然生效
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.is_some_and(|until| until > now)
    }

    /// 当前周期是否还有 CRP 配额
    ///
    /// max_crp = 0 时只允许一次发送
    pub fn has_crp_quota(&self) -> bool {
        if self.max_crp == 0 {
            self.crp_count == 0
        } else {
            self.crp_count < self.max_crp
        }
    }

    pub fn is_frp_due(&self, now: DateTime<Utc>) -> bool {
        self.is_recurring() && self.next_recurring.is_some_and(|at| now >= at)
    }

    pub fn is_crp_due(&self, now: DateTime<Utc>) -> bool {
        self.next_crp.is_some_and(|at| now >= at)
    }

    /// 用户是否已完成当前周期（尚未开始过周期视为已完成）
    pub fn is_cycle_completed(&self) -> bool {
        match (self.cycle_started_at, self.last_crp_completed_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(started), Some(done)) => done >= started,
        }
    }

    /// crp_until_complete 周期内用户已完成，不再发送 CRP
    pub fn is_crp_settled(&self) -> bool {
        self.is_recurring()
            && self.repeat_strategy == RepeatStrategy::CrpUntilComplete
            && self.cycle_started_at.is_some()
            && self.is_cycle_completed()
    }

    /// FRP 是否允许开始新周期
    pub fn frp_allowed(&self) -> bool {
        self.repeat_strategy == RepeatStrategy::None || self.is_cycle_completed()
    }

    /// 从 `now` 起下一次 CRP 时间
    pub fn crp_after(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        add_seconds(now, self.crp_interval_sec.max(0))
    }

    /// 写入前的字段检查（CRUD 层调用，Worker 不会遇到非法提醒）
    pub fn validate(&self) -> AppResult<()> {
        if self.id.trim().is_empty() || self.user_id.trim().is_empty() {
            return Err(AppError::validation(1, "提醒 id 和 user_id 不能为空"));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::validation(2, "提醒标题不能为空"));
        }
        if self.crp_interval_sec < 0 {
            return Err(AppError::validation(3, "crp_interval_sec 不能为负数"));
        }
        if self.max_crp > 0 && self.crp_count > self.max_crp {
            return Err(AppError::validation(4, "crp_count 不能超过 max_crp"));
        }
        if self.is_recurring() && self.recurrence_pattern.is_none() {
            return Err(AppError::validation(5, "循环提醒必须配置重复规则"));
        }
        if self.status != ReminderStatus::Completed && self.next_action_at.is_none() {
            return Err(AppError::validation(6, "未完成的提醒必须有 next_action_at"));
        }
        Ok(())
    }

    /// 推送正文
    pub fn notification_body(&self) -> &str {
        if self.description.is_empty() {
            &self.title
        } else {
            &self.description
        }
    }
}

/// `at` 之后 `seconds` 秒，超出可表示范围时返回计算错误
pub fn add_seconds(at: DateTime<Utc>, seconds: i64) -> AppResult<DateTime<Utc>> {
    Duration::try_seconds(seconds)
        .and_then(|interval| at.checked_add_signed(interval))
        .ok_or_else(|| AppError::calculation(11, format!("时间间隔超出范围: {} 秒", seconds)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Reminder {
        Reminder::new("r1", "u1", "吃药", ReminderType::OneTime, Utc::now())
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(ReminderType::OneTime.as_str(), "one_time");
        assert_eq!("crp_until_complete".parse::<RepeatStrategy>().unwrap(), RepeatStrategy::CrpUntilComplete);
        assert!("archived".parse::<ReminderStatus>().is_err());
    }

    #[test]
    fn test_pattern_json() {
        let json = r#"{"type":"interval_seconds","interval_seconds":3600,"base_on":"completion"}"#;
        let pattern: RecurrencePattern = serde_json::from_str(json).unwrap();
        assert_eq!(pattern, RecurrencePattern::interval(3600, BaseOn::Completion));

        let unknown = r#"{"type":"yearly"}"#;
        assert!(serde_json::from_str::<RecurrencePattern>(unknown).is_err());
    }

    #[test]
    fn test_crp_quota() {
        let mut reminder = base();
        reminder.max_crp = 3;
        reminder.crp_count = 2;
        assert!(reminder.has_crp_quota());
        reminder.crp_count = 3;
        assert!(!reminder.has_crp_quota());

        // max_crp = 0：只发一次
        reminder.max_crp = 0;
        reminder.crp_count = 0;
        assert!(reminder.has_crp_quota());
        reminder.crp_count = 1;
        assert!(!reminder.has_crp_quota());
    }

    #[test]
    fn test_snooze() {
        let now = Utc::now();
        let mut reminder = base();
        assert!(!reminder.is_snoozed(now));
        reminder.snooze_until = Some(now + Duration::minutes(5));
        assert!(reminder.is_snoozed(now));
        reminder.snooze_until = Some(now - Duration::minutes(5));
        assert!(!reminder.is_snoozed(now));
    }

    #[test]
    fn test_cycle_completion() {
        let now = Utc::now();
        let mut reminder = base();
        reminder.reminder_type = ReminderType::Recurring;
        reminder.repeat_strategy = RepeatStrategy::CrpUntilComplete;
        assert!(reminder.is_cycle_completed());
        assert!(!reminder.is_crp_settled());

        reminder.cycle_started_at = Some(now - Duration::hours(2));
        assert!(!reminder.is_cycle_completed());
        assert!(!reminder.frp_allowed());

        reminder.last_crp_completed_at = Some(now - Duration::hours(1));
        assert!(reminder.is_cycle_completed());
        assert!(reminder.is_crp_settled());
        assert!(reminder.frp_allowed());
    }

    #[test]
    fn test_frp_due_only_for_recurring() {
        let now = Utc::now();
        let mut reminder = base();
        reminder.next_recurring = Some(now - Duration::seconds(1));
        assert!(!reminder.is_frp_due(now));
        reminder.reminder_type = ReminderType::Recurring;
        assert!(reminder.is_frp_due(now));
    }

    #[test]
    fn test_notification_body() {
        let mut reminder = base();
        assert_eq!(reminder.notification_body(), "吃药");
        reminder.description = "饭后一粒".to_string();
        assert_eq!(reminder.notification_body(), "饭后一粒");
    }

    #[test]
    fn test_crp_after_overflow_is_calculation_error() {
        let now = Utc::now();
        let mut reminder = base();
        reminder.crp_interval_sec = 600;
        assert_eq!(reminder.crp_after(now).unwrap(), now + Duration::seconds(600));

        reminder.crp_interval_sec = i64::MAX;
        let err = reminder.crp_after(now).unwrap_err();
        assert!(matches!(err, AppError::Calculation(..)));
    }

    #[test]
    fn test_validate() {
        let mut reminder = base();
        reminder.next_action_at = Some(Utc::now());
        assert!(reminder.validate().is_ok());

        let mut bad = reminder.clone();
        bad.crp_interval_sec = -1;
        assert!(matches!(bad.validate(), Err(AppError::Validation(..))));

        let mut bad = reminder.clone();
        bad.reminder_type = ReminderType::Recurring;
        assert!(matches!(bad.validate(), Err(AppError::Validation(..))));

        let mut bad = reminder.clone();
        bad.next_action_at = None;
        assert!(bad.validate().is_err());
        bad.status = ReminderStatus::Completed;
        assert!(bad.validate().is_ok());
    }
}
