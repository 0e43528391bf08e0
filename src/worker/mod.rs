/// 提醒 Worker
///
/// 每个轮询周期：检查开关 → 拉取到期提醒 → 逐条决定 FRP/CRP → 推送 → 回写状态。
/// 单条提醒的找不到/计算错误/令牌失效只影响该提醒，系统级错误会停用 Worker。

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use crate::error::{AppError, AppResult, FailureKind};
use crate::notification::NotificationSender;
use crate::reminder::{Reminder, ReminderStatus, ScheduleCalculator};
use crate::store::{ReminderStore, SystemStatusStore, User, UserStore};

pub mod scheduler;

pub use scheduler::WorkerScheduler;

/// 单个周期的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// 本周期拉取到的到期提醒数
    pub due: usize,
    /// 成功推送数
    pub sent: usize,
    /// 因稍后提醒而推迟的数量
    pub snoozed: usize,
    /// 未推送（无触发或用户无有效令牌）
    pub skipped: usize,
    /// 令牌失效数
    pub token_invalid: usize,
    /// 找不到或计算错误
    pub failures: usize,
}

/// 周期结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Worker 已被停用，本周期未做任何事
    Disabled,
    Completed(CycleStats),
    /// 发生系统级错误，Worker 已停用
    Escalated { stats: CycleStats, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Frp,
    Crp,
}

/// 提醒 Worker
pub struct Worker {
    reminders: Arc<dyn ReminderStore>,
    users: Arc<dyn UserStore>,
    status: Arc<dyn SystemStatusStore>,
    sender: Arc<dyn NotificationSender>,
    calculator: ScheduleCalculator,
}

impl Worker {
    pub fn new(
        reminders: Arc<dyn ReminderStore>,
        users: Arc<dyn UserStore>,
        status: Arc<dyn SystemStatusStore>,
        sender: Arc<dyn NotificationSender>,
        calculator: ScheduleCalculator,
    ) -> Self {
        Self {
            reminders,
            users,
            status,
            sender,
            calculator,
        }
    }

    /// 按固定间隔循环执行 run_once，直到 shutdown 变为 true 或发送端被丢弃
    ///
    /// 只在等待计时器时响应取消，进行中的周期总会执行完
    pub async fn start(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Reminder worker started, polling every {:?}", poll_interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            match self.run_once(Utc::now()).await {
                Ok(CycleOutcome::Escalated { reason, .. }) => {
                    error!("Reminder worker disabled: {}", reason);
                }
                Ok(_) => {}
                Err(e) => error!("Reminder cycle aborted: {}", e),
            }
        }

        info!("Reminder worker stopped");
    }

    /// 执行一个轮询周期
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<CycleOutcome> {
        if !self.status.is_worker_enabled().await? {
            debug!("Reminder worker is disabled, skipping cycle");
            return Ok(CycleOutcome::Disabled);
        }

        let due = self.reminders.get_due_reminders(now).await?;
        let mut stats = CycleStats {
            due: due.len(),
            ..CycleStats::default()
        };

        for reminder in &due {
            let Err(err) = self.process(reminder, now, &mut stats).await else {
                continue;
            };

            match err.failure_kind() {
                FailureKind::NotFound | FailureKind::Calculation | FailureKind::TokenInvalid => {
                    warn!("Skipping reminder {}: {}", reminder.id, err);
                    stats.failures += 1;
                }
                FailureKind::System => {
                    let reason = err.to_string();
                    error!("System failure on reminder {}: {}", reminder.id, reason);
                    self.status.disable_worker(&reason).await?;
                    return Ok(CycleOutcome::Escalated { stats, reason });
                }
            }
        }

        self.status.clear_error().await?;

        if stats.due > 0 {
            info!(
                "Reminder cycle done: due={} sent={} snoozed={} skipped={} token_invalid={} failures={}",
                stats.due, stats.sent, stats.snoozed, stats.skipped, stats.token_invalid, stats.failures
            );
        }

        Ok(CycleOutcome::Completed(stats))
    }

    async fn process(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) -> AppResult<()> {
        if reminder.is_snoozed(now) {
            let next = self.calculator.calculate_next_action_at(reminder, now);
            debug!("Reminder {} snoozed until {:?}", reminder.id, next);
            self.reminders.update_next_action_at(&reminder.id, next).await?;
            stats.snoozed += 1;
            return Ok(());
        }

        let Some(trigger) = self.trigger_for(reminder, now) else {
            let next = self.calculator.calculate_next_action_at(reminder, now);
            debug!("Reminder {} has nothing to fire, next action at {:?}", reminder.id, next);
            self.reminders.update_next_action_at(&reminder.id, next).await?;
            stats.skipped += 1;
            return Ok(());
        };

        let user = self.users.get_by_id(&reminder.user_id).await?;
        let mut updated = self.advance(reminder, trigger, now)?;

        let Some(token) = user.active_token() else {
            debug!(
                "User {} has no active push token, advancing reminder {} without sending",
                user.id, reminder.id
            );
            self.reminders.update(&updated).await?;
            stats.skipped += 1;
            return Ok(());
        };

        match self
            .sender
            .send_notification(token, &reminder.title, reminder.notification_body())
            .await
        {
            Ok(()) => {
                debug!("Sent {:?} for reminder {}", trigger, reminder.id);
                updated.last_sent_at = Some(now);
                self.reminders.update(&updated).await?;
                stats.sent += 1;
                Ok(())
            }
            Err(err) => self.handle_send_failure(&user, reminder, err, stats).await,
        }
    }

    async fn handle_send_failure(
        &self,
        user: &User,
        reminder: &Reminder,
        err: AppError,
        stats: &mut CycleStats,
    ) -> AppResult<()> {
        match err.failure_kind() {
            FailureKind::TokenInvalid => {
                warn!(
                    "Push token of user {} rejected for reminder {}: {}",
                    user.id, reminder.id, err
                );
                self.users.disable_fcm(&user.id).await?;
                stats.token_invalid += 1;
                Ok(())
            }
            // 未识别为令牌失效的推送错误一律按系统级处理
            _ => Err(match err {
                AppError::System(..) => err,
                other => AppError::system(30, format!("推送失败: {}", other)),
            }),
        }
    }

    /// 决定本次触发类型
    fn trigger_for(&self, reminder: &Reminder, now: DateTime<Utc>) -> Option<Trigger> {
        if reminder.is_frp_due(now) && reminder.frp_allowed() {
            return Some(Trigger::Frp);
        }
        if self.calculator.can_send_crp(reminder, now) && !reminder.is_crp_settled() {
            return Some(Trigger::Crp);
        }
        None
    }

    /// 计算触发后的提醒状态（发送前完成，计算失败则不发送）
    fn advance(&self, reminder: &Reminder, trigger: Trigger, now: DateTime<Utc>) -> AppResult<Reminder> {
        let mut next = reminder.clone();

        match trigger {
            Trigger::Frp => {
                next.crp_count = 0;
                next.cycle_started_at = Some(now);
                next.next_recurring = Some(self.calculator.calculate_next_recurring(reminder, now)?);
                next.next_crp = if next.max_crp > 0 && next.crp_interval_sec > 0 {
                    Some(next.crp_after(now)?)
                } else {
                    None
                };
            }
            Trigger::Crp => {
                next.crp_count += 1;
                if next.has_crp_quota() {
                    next.next_crp = Some(next.crp_after(now)?);
                } else {
                    next.next_crp = None;
                    if next.is_one_time() {
                        next.status = ReminderStatus::Completed;
                    }
                }
            }
        }

        next.next_action_at = self.calculator.calculate_next_action_at(&next, now);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::{RecurrencePattern, ReminderType, RepeatStrategy};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    struct OkSender;

    #[async_trait]
    impl NotificationSender for OkSender {
        async fn send_notification(&self, _: &str, _: &str, _: &str) -> AppResult<()> {
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()
    }

    fn worker(store: &Arc<MemoryStore>) -> Worker {
        Worker::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(OkSender),
            ScheduleCalculator::default(),
        )
    }

    #[test]
    fn test_trigger_frp_wins_tie() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(&store);
        let mut r = Reminder::new("r", "u", "t", ReminderType::Recurring, now());
        r.next_recurring = Some(now());
        r.next_crp = Some(now());
        r.max_crp = 2;
        assert_eq!(worker.trigger_for(&r, now()), Some(Trigger::Frp));
    }

    #[test]
    fn test_trigger_blocked_until_complete() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(&store);
        let mut r = Reminder::new("r", "u", "t", ReminderType::Recurring, now());
        r.repeat_strategy = RepeatStrategy::CrpUntilComplete;
        r.cycle_started_at = Some(now() - ChronoDuration::hours(1));
        r.next_recurring = Some(now() - ChronoDuration::seconds(1));
        r.max_crp = 1;
        r.crp_count = 1;
        assert_eq!(worker.trigger_for(&r, now()), None);

        r.last_crp_completed_at = Some(now() - ChronoDuration::minutes(1));
        assert_eq!(worker.trigger_for(&r, now()), Some(Trigger::Frp));
    }

    #[test]
    fn test_advance_frp_starts_cycle() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(&store);
        let mut r = Reminder::new("r", "u", "t", ReminderType::Recurring, now());
        r.recurrence_pattern = Some(RecurrencePattern::daily("09:00"));
        r.next_recurring = Some(now() - ChronoDuration::seconds(1));
        r.max_crp = 2;
        r.crp_count = 2;
        r.crp_interval_sec = 300;

        let next = worker.advance(&r, Trigger::Frp, now()).unwrap();
        assert_eq!(next.crp_count, 0);
        assert_eq!(next.cycle_started_at, Some(now()));
        assert_eq!(next.next_recurring, Some(Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()));
        assert_eq!(next.next_crp, Some(now() + ChronoDuration::seconds(300)));
        assert_eq!(next.next_action_at, next.next_crp);
    }

    #[test]
    fn test_advance_frp_without_pattern_fails() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(&store);
        let r = Reminder::new("r", "u", "t", ReminderType::Recurring, now());
        let err = worker.advance(&r, Trigger::Frp, now()).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Calculation);
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let worker = Arc::new(worker(&store));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.start(Duration::from_millis(10), rx).await }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.calls().contains(&crate::store::memory::StoreCall::IsWorkerEnabled));
    }
}
