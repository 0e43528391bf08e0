/// 通知投递
///
/// 通过 FCM HTTP v1 接口发送推送，并把失败归类为令牌失效或系统级错误

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use super::NotificationSender;
use crate::error::{AppError, AppResult, FailureKind};
use crate::settings::FcmSettings;

#[derive(Debug, Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct FcmErrorResponse {
    error: FcmErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct FcmErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

impl FcmErrorBody {
    /// details 中的 errorCode 比顶层 status 更具体
    fn code(&self) -> &str {
        self.details
            .iter()
            .find_map(|d| d.error_code.as_deref())
            .unwrap_or(self.status.as_str())
    }
}

const TOKEN_INVALID_CODES: &[&str] = &["UNREGISTERED", "INVALID_ARGUMENT", "NOT_FOUND"];

const TOKEN_INVALID_MESSAGES: &[&str] = &[
    "registration-token-not-registered",
    "invalid-registration-token",
    "requested entity was not found",
];

/// 推送失败分类
pub fn classify_failure(http_status: Option<u16>, code: &str, message: &str) -> FailureKind {
    if http_status == Some(404) {
        return FailureKind::TokenInvalid;
    }

    if TOKEN_INVALID_CODES.iter().any(|c| code.eq_ignore_ascii_case(c)) {
        return FailureKind::TokenInvalid;
    }

    let message = message.to_lowercase();
    if TOKEN_INVALID_MESSAGES.iter().any(|m| message.contains(m)) {
        return FailureKind::TokenInvalid;
    }

    FailureKind::System
}

/// FCM 推送发送器
pub struct FcmSender {
    client: Client,
    endpoint: String,
    project_id: String,
    access_token: SecretString,
}

impl FcmSender {
    pub fn new(settings: &FcmSettings) -> AppResult<Self> {
        if settings.project_id.trim().is_empty() {
            return Err(AppError::settings(10, "未配置 FCM project_id"));
        }

        let access_token = settings
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::settings(11, "未配置 FCM access_token"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            project_id: settings.project_id.clone(),
            access_token: SecretString::new(access_token),
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[async_trait]
impl NotificationSender for FcmSender {
    async fn send_notification(&self, token: &str, title: &str, body: &str) -> AppResult<()> {
        let request_body = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification { title, body },
            },
        };

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(self.access_token.expose_secret())
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("FCM accepted message for token ending in {}", token_suffix(token));
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<FcmErrorResponse>(&error_text)
            .map(|r| r.error)
            .unwrap_or_default();
        let message = if error.message.is_empty() {
            error_text.clone()
        } else {
            error.message.clone()
        };

        Err(match classify_failure(Some(status.as_u16()), error.code(), &message) {
            FailureKind::TokenInvalid => {
                AppError::token_invalid(status.as_u16(), format!("推送令牌失效: {}", message))
            }
            _ => AppError::system(
                status.as_u16(),
                format!("FCM 返回错误 {}: {}", status, message),
            ),
        })
    }
}

fn token_suffix(token: &str) -> &str {
    let start = token
        .char_indices()
        .rev()
        .nth(5)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &token[start..]
}
