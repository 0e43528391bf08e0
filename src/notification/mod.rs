/// 通知发送
///
/// Worker 通过 NotificationSender 投递推送，具体通道（FCM）可替换

use async_trait::async_trait;
use crate::error::AppResult;

pub mod delivery;

pub use delivery::{classify_failure, FcmSender};

/// 推送通道
///
/// 失败时返回的错误需能被分类：令牌失效使用 `AppError::TokenInvalid`，
/// 其余错误均视为系统级
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_notification(&self, token: &str, title: &str, body: &str) -> AppResult<()>;
}
