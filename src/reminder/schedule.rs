/// 调度计算器
///
/// 根据提醒的重复配置与参考时间 `now` 计算下一次 FRP、CRP 以及
/// Worker 轮询用的 next_action_at。`now` 总是由调用方传入。

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use crate::calendar::LunarCalendar;
use crate::error::{AppError, AppResult};
use super::{add_seconds, BaseOn, CalendarType, PatternType, RecurrencePattern, Reminder};

/// 农历扫描的最大朔望月数
const MAX_LUNAR_SCAN: usize = 13;

/// 调度计算器
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleCalculator {
    calendar: LunarCalendar,
}

impl ScheduleCalculator {
    pub fn new(calendar: LunarCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &LunarCalendar {
        &self.calendar
    }

    /// 计算下一次 FRP 触发时间
    pub fn calculate_next_recurring(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>> {
        let pattern = reminder.recurrence_pattern.as_ref().ok_or_else(|| {
            AppError::calculation(1, format!("提醒 {} 缺少重复规则", reminder.id))
        })?;

        match pattern.pattern_type {
            PatternType::IntervalSeconds => next_interval(reminder, pattern, now),
            PatternType::Daily => {
                let time = required_time(pattern)?;
                Ok(next_daily(time, now))
            }
            PatternType::Weekly => {
                let time = required_time(pattern)?;
                let day_of_week = pattern
                    .day_of_week
                    .ok_or_else(|| AppError::calculation(4, "每周提醒缺少 day_of_week"))?;
                next_weekly(day_of_week, time, now)
            }
            PatternType::Monthly => {
                let time = required_time(pattern)?;
                let day_of_month = pattern
                    .day_of_month
                    .ok_or_else(|| AppError::calculation(5, "每月提醒缺少 day_of_month"))?;
                match reminder.calendar_type {
                    CalendarType::Solar => next_monthly_solar(day_of_month, time, now),
                    CalendarType::Lunar => self.next_monthly_lunar(day_of_month, time, now),
                }
            }
            PatternType::LunarLastDayOfMonth => {
                let time = required_time(pattern)?;
                self.next_lunar_last_day(time, now)
            }
        }
    }

    /// 计算 Worker 轮询时间
    ///
    /// 优先级：稍后提醒 > 一次性提醒的 CRP > 循环提醒的 FRP/CRP 较早者（相同时 FRP 优先）
    pub fn calculate_next_action_at(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if reminder.is_snoozed(now) {
            return reminder.snooze_until;
        }
        if reminder.is_completed() {
            return None;
        }
        if reminder.is_one_time() {
            return reminder.next_crp;
        }

        let crp = reminder
            .next_crp
            .filter(|_| reminder.has_crp_quota() && !reminder.is_crp_settled());

        // FRP 已到期但被 crp_until_complete 挡住时，改为等待剩余的 CRP
        let frp_blocked = !reminder.frp_allowed()
            && reminder.next_recurring.is_some_and(|frp| frp <= now);
        if frp_blocked && crp.is_some() {
            return crp;
        }

        match (reminder.next_recurring, crp) {
            (Some(frp), Some(crp)) if crp < frp => Some(crp),
            (Some(frp), _) => Some(frp),
            (None, crp) => crp,
        }
    }

    /// 是否可以发送 CRP
    pub fn can_send_crp(&self, reminder: &Reminder, now: DateTime<Utc>) -> bool {
        reminder.has_crp_quota() && reminder.is_crp_due(now)
    }

    fn next_monthly_lunar(
        &self,
        day_of_month: u32,
        time: NaiveTime,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>> {
        if !(1..=30).contains(&day_of_month) {
            return Err(AppError::calculation(
                6,
                format!("农历日期超出范围: {}", day_of_month),
            ));
        }

        let mut month = self.calendar.month_containing(now.date_naive());
        for _ in 0..MAX_LUNAR_SCAN {
            if let Some(date) = month.date_of_day(day_of_month) {
                let candidate = at_time(date, time);
                if candidate > now {
                    return Ok(candidate);
                }
            }
            month = self.calendar.next_month(&month);
        }

        Err(AppError::calculation(
            7,
            format!("{} 个农历月内找不到第 {} 天", MAX_LUNAR_SCAN, day_of_month),
        ))
    }

    fn next_lunar_last_day(&self, time: NaiveTime, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        let mut month = self.calendar.month_containing(now.date_naive());
        for _ in 0..MAX_LUNAR_SCAN {
            if let Some(date) = month.last_date() {
                let candidate = at_time(date, time);
                if candidate > now {
                    return Ok(candidate);
                }
            }
            month = self.calendar.next_month(&month);
        }

        Err(AppError::calculation(8, "无法计算农历月末日期"))
    }
}

/// 解析 "HH:MM" 格式时间
pub fn parse_time_of_day(time: &str) -> AppResult<NaiveTime> {
    let invalid = || AppError::calculation(3, format!("时间格式必须是 HH:MM: {:?}", time));

    let (hour, minute) = time.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

fn required_time(pattern: &RecurrencePattern) -> AppResult<NaiveTime> {
    match pattern.trigger_time_of_day.as_deref() {
        Some(time) if !time.trim().is_empty() => parse_time_of_day(time),
        _ => Err(AppError::calculation(2, "缺少 trigger_time_of_day")),
    }
}

fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

fn next_interval(
    reminder: &Reminder,
    pattern: &RecurrencePattern,
    now: DateTime<Utc>,
) -> AppResult<DateTime<Utc>> {
    let seconds = match pattern.interval_seconds {
        Some(seconds) if seconds > 0 => seconds,
        _ => return Err(AppError::calculation(9, "interval_seconds 必须大于 0")),
    };

    let base = match (pattern.base_on, reminder.last_completed_at) {
        (BaseOn::Creation, _) => return add_seconds(now, seconds),
        (BaseOn::Completion, Some(completed)) => completed,
        (BaseOn::Completion, None) => reminder.created_at,
    };

    // 基准过旧时重新以 now 为基准，避免 FRP 立即再次到期
    let candidate = add_seconds(base, seconds)?;
    if candidate > now {
        Ok(candidate)
    } else {
        add_seconds(now, seconds)
    }
}

fn next_daily(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = at_time(now.date_naive(), time);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

fn next_weekly(day_of_week: u32, time: NaiveTime, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    if day_of_week > 6 {
        return Err(AppError::calculation(
            4,
            format!("day_of_week 必须在 0-6 之间: {}", day_of_week),
        ));
    }

    let today = now.weekday().num_days_from_sunday();
    let days_ahead = (day_of_week + 7 - today) % 7;
    let candidate = at_time(now.date_naive(), time) + Duration::days(days_ahead as i64);
    if candidate > now {
        Ok(candidate)
    } else {
        Ok(candidate + Duration::days(7))
    }
}

fn next_monthly_solar(
    day_of_month: u32,
    time: NaiveTime,
    now: DateTime<Utc>,
) -> AppResult<DateTime<Utc>> {
    if !(1..=31).contains(&day_of_month) {
        return Err(AppError::calculation(
            5,
            format!("day_of_month 必须在 1-31 之间: {}", day_of_month),
        ));
    }

    let mut year = now.year();
    let mut month = now.month();
    // 最多跨过几个没有该日期的短月
    for _ in 0..24 {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day_of_month) {
            let candidate = at_time(date, time);
            if candidate > now {
                return Ok(candidate);
            }
        }
        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }

    Err(AppError::calculation(10, "无法计算下一个每月触发时间"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::{ReminderStatus, ReminderType};
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn recurring(pattern: RecurrencePattern) -> Reminder {
        let mut reminder = Reminder::new(
            "r1",
            "u1",
            "提醒",
            ReminderType::Recurring,
            utc(2024, 1, 1, 0, 0),
        );
        reminder.recurrence_pattern = Some(pattern);
        reminder
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("08:30").unwrap(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(parse_time_of_day("9:05").unwrap(), NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("12:60").is_err());
        assert!(parse_time_of_day("12-30").is_err());
    }

    #[test]
    fn test_missing_pattern_is_error() {
        let calc = ScheduleCalculator::default();
        let mut reminder = recurring(RecurrencePattern::daily("08:00"));
        reminder.recurrence_pattern = None;
        let err = calc.calculate_next_recurring(&reminder, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("ERR_CALCULATION"));
    }

    #[test]
    fn test_daily() {
        let calc = ScheduleCalculator::default();
        let reminder = recurring(RecurrencePattern::daily("08:00"));

        let before = utc(2024, 3, 10, 7, 0);
        assert_eq!(calc.calculate_next_recurring(&reminder, before).unwrap(), utc(2024, 3, 10, 8, 0));

        // 恰好等于触发时间也算已过
        let exact = utc(2024, 3, 10, 8, 0);
        assert_eq!(calc.calculate_next_recurring(&reminder, exact).unwrap(), utc(2024, 3, 11, 8, 0));
    }

    #[test]
    fn test_daily_empty_time_is_error() {
        let calc = ScheduleCalculator::default();
        let reminder = recurring(RecurrencePattern::daily(""));
        assert!(calc.calculate_next_recurring(&reminder, Utc::now()).is_err());
    }

    #[test]
    fn test_weekly() {
        let calc = ScheduleCalculator::default();
        // 2024-03-10 是周日
        let reminder = recurring(RecurrencePattern::weekly(3, "09:00"));
        let now = utc(2024, 3, 10, 12, 0);
        assert_eq!(calc.calculate_next_recurring(&reminder, now).unwrap(), utc(2024, 3, 13, 9, 0));

        // 同一天但时间未过
        let same_day = recurring(RecurrencePattern::weekly(0, "18:00"));
        assert_eq!(calc.calculate_next_recurring(&same_day, now).unwrap(), utc(2024, 3, 10, 18, 0));

        // 同一天且时间已过 → 下周
        let passed = recurring(RecurrencePattern::weekly(0, "09:00"));
        assert_eq!(calc.calculate_next_recurring(&passed, now).unwrap(), utc(2024, 3, 17, 9, 0));

        let invalid = recurring(RecurrencePattern::weekly(7, "09:00"));
        assert!(calc.calculate_next_recurring(&invalid, now).is_err());
    }

    #[test]
    fn test_monthly_solar() {
        let calc = ScheduleCalculator::default();
        let reminder = recurring(RecurrencePattern::monthly(15, "10:00"));
        assert_eq!(
            calc.calculate_next_recurring(&reminder, utc(2024, 3, 10, 0, 0)).unwrap(),
            utc(2024, 3, 15, 10, 0)
        );
        assert_eq!(
            calc.calculate_next_recurring(&reminder, utc(2024, 12, 20, 0, 0)).unwrap(),
            utc(2025, 1, 15, 10, 0)
        );
    }

    #[test]
    fn test_monthly_solar_skips_short_months() {
        let calc = ScheduleCalculator::default();
        let reminder = recurring(RecurrencePattern::monthly(31, "10:00"));
        // 1 月 31 日已过，2 月没有 31 日 → 3 月 31 日
        assert_eq!(
            calc.calculate_next_recurring(&reminder, utc(2024, 1, 31, 12, 0)).unwrap(),
            utc(2024, 3, 31, 10, 0)
        );
    }

    #[test]
    fn test_monthly_lunar() {
        let calc = ScheduleCalculator::default();
        let mut reminder = recurring(RecurrencePattern::monthly(1, "02:00"));
        reminder.calendar_type = CalendarType::Lunar;

        // 2024-02-01 之后的第一个农历初一是春节 2024-02-10
        let next = calc.calculate_next_recurring(&reminder, utc(2024, 2, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 2, 10, 2, 0));

        // 当天已过 → 下一个农历月
        let after = calc.calculate_next_recurring(&reminder, utc(2024, 2, 10, 3, 0)).unwrap();
        assert!(after > utc(2024, 3, 1, 0, 0) && after < utc(2024, 3, 20, 0, 0));
        let lunar = calc.calendar().solar_to_lunar(after.day(), after.month(), after.year());
        assert_eq!(lunar.day, 1);
    }

    #[test]
    fn test_lunar_last_day_of_month() {
        let calc = ScheduleCalculator::default();
        let mut reminder = recurring(RecurrencePattern::new(PatternType::LunarLastDayOfMonth));
        reminder.recurrence_pattern.as_mut().unwrap().trigger_time_of_day = Some("01:00".into());

        let now = utc(2024, 2, 20, 0, 0);
        let next = calc.calculate_next_recurring(&reminder, now).unwrap();
        // 春节所在月的最后一天即下个农历月初一的前一天
        let month = calc.calendar().month_containing(now.date_naive());
        let following = calc.calendar().next_month(&month);
        assert_eq!(Some(next.date_naive()), following.start_date().and_then(|d| d.pred_opt()));

        // 最后一天的触发时间已过 → 下个月的最后一天
        let late = at_time(next.date_naive(), NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        let rolled = calc.calculate_next_recurring(&reminder, late).unwrap();
        assert_eq!(Some(rolled.date_naive()), following.last_date());
    }

    #[test]
    fn test_interval_base_on() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);

        let creation = recurring(RecurrencePattern::interval(3600, BaseOn::Creation));
        assert_eq!(calc.calculate_next_recurring(&creation, now).unwrap(), now + Duration::hours(1));

        let mut completion = recurring(RecurrencePattern::interval(3600, BaseOn::Completion));
        // 尚未完成过 → 基于创建时间，已过期则以 now 为基准
        assert_eq!(calc.calculate_next_recurring(&completion, now).unwrap(), now + Duration::hours(1));
        let early = utc(2024, 1, 1, 0, 10);
        assert_eq!(
            calc.calculate_next_recurring(&completion, early).unwrap(),
            utc(2024, 1, 1, 1, 0)
        );

        completion.last_completed_at = Some(now - Duration::minutes(30));
        assert_eq!(
            calc.calculate_next_recurring(&completion, now).unwrap(),
            now + Duration::minutes(30)
        );

        completion.last_completed_at = Some(now - Duration::days(1));
        assert_eq!(calc.calculate_next_recurring(&completion, now).unwrap(), now + Duration::hours(1));

        let zero = recurring(RecurrencePattern::interval(0, BaseOn::Creation));
        assert!(calc.calculate_next_recurring(&zero, now).is_err());
    }

    #[test]
    fn test_interval_overflow_is_calculation_error() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);

        for base_on in [BaseOn::Creation, BaseOn::Completion] {
            let huge = recurring(RecurrencePattern::interval(10_000_000_000_000, base_on));
            let err = calc.calculate_next_recurring(&huge, now).unwrap_err();
            assert!(matches!(err, AppError::Calculation(..)));

            let max = recurring(RecurrencePattern::interval(i64::MAX, base_on));
            assert!(calc.calculate_next_recurring(&max, now).is_err());
        }
    }

    #[test]
    fn test_next_action_at_blocked_frp_waits_for_crp() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);
        let mut reminder = recurring(RecurrencePattern::daily("08:00"));
        reminder.repeat_strategy = crate::reminder::RepeatStrategy::CrpUntilComplete;
        reminder.cycle_started_at = Some(now - Duration::days(1));
        reminder.next_recurring = Some(now - Duration::hours(4));
        reminder.max_crp = 3;
        reminder.crp_count = 1;
        reminder.next_crp = Some(now + Duration::minutes(10));
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_crp);

        // 没有剩余配额时仍停留在已到期的 FRP
        reminder.crp_count = 3;
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_recurring);

        // 用户完成后 FRP 不再被挡住
        reminder.crp_count = 1;
        reminder.last_crp_completed_at = Some(now - Duration::hours(1));
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_recurring);
    }

    #[test]
    fn test_next_action_at_snooze_wins() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);
        let mut reminder = recurring(RecurrencePattern::daily("08:00"));
        reminder.next_recurring = Some(now - Duration::minutes(1));
        reminder.snooze_until = Some(now + Duration::minutes(10));
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.snooze_until);
    }

    #[test]
    fn test_next_action_at_one_time() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);
        let mut reminder = Reminder::new("r1", "u1", "t", ReminderType::OneTime, now);
        reminder.next_crp = Some(now + Duration::minutes(5));
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_crp);

        reminder.status = ReminderStatus::Completed;
        assert_eq!(calc.calculate_next_action_at(&reminder, now), None);
    }

    #[test]
    fn test_next_action_at_recurring_earliest() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);
        let mut reminder = recurring(RecurrencePattern::daily("08:00"));
        reminder.max_crp = 3;
        reminder.next_recurring = Some(now + Duration::hours(20));
        reminder.next_crp = Some(now + Duration::minutes(10));
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_crp);

        // 配额耗尽 → 只看 FRP
        reminder.crp_count = 3;
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_recurring);

        // 相同时间 FRP 优先
        reminder.crp_count = 0;
        reminder.next_crp = reminder.next_recurring;
        assert_eq!(calc.calculate_next_action_at(&reminder, now), reminder.next_recurring);
    }

    #[test]
    fn test_can_send_crp() {
        let calc = ScheduleCalculator::default();
        let now = utc(2024, 3, 10, 12, 0);
        let mut reminder = Reminder::new("r1", "u1", "t", ReminderType::OneTime, now);
        reminder.max_crp = 2;
        reminder.next_crp = Some(now + Duration::seconds(1));
        assert!(!calc.can_send_crp(&reminder, now));

        reminder.next_crp = Some(now);
        assert!(calc.can_send_crp(&reminder, now));

        reminder.crp_count = 2;
        assert!(!calc.can_send_crp(&reminder, now));
    }
}
