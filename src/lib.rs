// 模块声明
pub mod error;
pub mod calendar;
pub mod reminder;
pub mod store;
pub mod db;
pub mod notification;
pub mod settings;
pub mod worker;

// 导出常用类型
pub use error::{AppError, AppResult, FailureKind};
pub use calendar::{LunarCalendar, LunarDate};
pub use reminder::{Reminder, ScheduleCalculator};
pub use worker::{CycleOutcome, CycleStats, Worker, WorkerScheduler};

use anyhow::Context;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// 指定配置文件路径的环境变量
pub const ENV_SETTINGS_PATH: &str = "REMINDER_SETTINGS";

pub async fn run() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // 加载设置
    let settings_path = std::env::var(ENV_SETTINGS_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| settings::default_settings_path());
    let settings_manager = settings::SettingsManager::load(&settings_path)?;
    let settings = settings_manager.get();

    // 初始化数据库
    let db_path = settings_manager.database_path();
    let db = Arc::new(db::Database::new(db_path.clone())?);
    db.initialize()?;
    info!("Database ready at {}", db_path.display());

    // 初始化推送与 Worker
    let sender = Arc::new(notification::FcmSender::new(&settings.fcm)?);
    let calculator = ScheduleCalculator::new(LunarCalendar::new(settings.lunar_time_zone));
    let worker = Worker::new(db.clone(), db.clone(), db, sender, calculator);

    let mut scheduler = WorkerScheduler::new(Arc::new(worker), settings_manager.poll_interval());
    scheduler.start().await?;
    info!("Reminder engine running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("等待退出信号失败")?;

    info!("Shutting down reminder engine");
    scheduler.stop().await?;

    Ok(())
}
