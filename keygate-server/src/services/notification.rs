//! Notification Service
//!
//! 完成通知。发送入口只有一个；是否真的发由订单上的
//! completion_email_sent 守卫决定（编排器先翻 flag 再调这里）。

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::ServiceResult;
use crate::utils::AppError;

/// 完成邮件的内容摘要
#[derive(Debug, Clone, Serialize)]
pub struct OrderCompletedSummary {
    pub order_id: String,
    /// (商品名, 签名下载链接)
    pub items: Vec<(String, String)>,
    pub total: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_completed(
        &self,
        email: &str,
        summary: &OrderCompletedSummary,
    ) -> ServiceResult<()>;
}

/// 投递到外部邮件网关的 HTTP 通知器
///
/// endpoint 未配置时只记日志 —— 开发环境不需要真网关。
pub struct HttpNotifier {
    client: Client,
    endpoint: Option<String>,
}

impl HttpNotifier {
    pub fn new(endpoint: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[derive(Serialize)]
struct MailRequest<'a> {
    to: &'a str,
    template: &'a str,
    #[serde(flatten)]
    summary: &'a OrderCompletedSummary,
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_order_completed(
        &self,
        email: &str,
        summary: &OrderCompletedSummary,
    ) -> ServiceResult<()> {
        let Some(endpoint) = &self.endpoint else {
            tracing::info!(
                order_id = %summary.order_id,
                email = %email,
                "Mail gateway not configured, skipping completion email"
            );
            return Ok(());
        };

        self.client
            .post(endpoint)
            .json(&MailRequest {
                to: email,
                template: "order_completed",
                summary,
            })
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(order_id = %summary.order_id, "Completion email dispatched");
        Ok(())
    }
}
