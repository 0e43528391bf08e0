/// Worker 调度器
///
/// 在后台任务中按配置间隔运行 Worker，可启动、停止

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use super::Worker;

/// Worker 调度器
pub struct WorkerScheduler {
    worker: Arc<Worker>,
    poll_interval: Duration,
    is_running: Arc<Mutex<bool>>,
    shutdown: Option<watch::Sender<bool>>,
    task_handle: Option<JoinHandle<()>>,
}

impl WorkerScheduler {
    /// 创建新的调度器
    pub fn new(worker: Arc<Worker>, poll_interval: Duration) -> Self {
        Self {
            worker,
            poll_interval,
            is_running: Arc::new(Mutex::new(false)),
            shutdown: None,
            task_handle: None,
        }
    }

    /// 启动调度器
    pub async fn start(&mut self) -> Result<()> {
        let mut running = self.is_running.lock().await;
        if *running {
            anyhow::bail!("调度器已经在运行");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("轮询间隔必须大于 0");
        }

        *running = true;
        drop(running); // 释放锁

        let (tx, rx) = watch::channel(false);
        let worker = Arc::clone(&self.worker);
        let poll_interval = self.poll_interval;

        // 启动后台任务
        let handle = tokio::spawn(async move {
            worker.start(poll_interval, rx).await;
        });

        self.shutdown = Some(tx);
        self.task_handle = Some(handle);

        Ok(())
    }

    /// 停止调度器，等待进行中的周期结束
    pub async fn stop(&mut self) -> Result<()> {
        let mut running = self.is_running.lock().await;
        if !*running {
            anyhow::bail!("调度器未运行");
        }

        *running = false;
        drop(running);

        if let Some(tx) = self.shutdown.take() {
            // 接收端已退出时发送失败，无需处理
            let _ = tx.send(true);
        }

        // 等待任务完成
        if let Some(handle) = self.task_handle.take() {
            handle.await?;
        }

        Ok(())
    }

    /// 检查是否正在运行
    pub async fn is_running(&self) -> bool {
        *self.is_running.lock().await
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
