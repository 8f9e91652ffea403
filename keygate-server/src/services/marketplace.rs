//! Marketplace Client
//!
//! 上游数字商品市场的 HTTP 客户端。下单携带我方 external_id，
//! 市场侧以此去重 —— 重试的 reserve 任务拿到 DuplicateExternalId
//! 后走 search_orders 认领既有预订单，而不是重复下单。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ServiceError, ServiceResult};
use crate::utils::AppError;

/// 下单行：市场商品 ID + 数量（同一商品合并为一行）
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProductLine {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceOrder {
    pub order_id: String,
    pub status: String,
}

/// 市场交付的单条密钥
#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceKey {
    pub serial: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub product_id: String,
}

#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// 一次调用覆盖订单内全部商品行
    async fn place_order(
        &self,
        products: &[ProductLine],
        external_id: &str,
    ) -> ServiceResult<MarketplaceOrder>;

    async fn get_order_status(&self, marketplace_order_id: &str) -> ServiceResult<String>;

    /// 交付后一次拉取全部密钥
    async fn get_keys(&self, marketplace_order_id: &str) -> ServiceResult<Vec<MarketplaceKey>>;

    /// 按 external_id 检索既有预订单（下单幂等的认领路径）
    async fn search_orders(&self, external_id: &str) -> ServiceResult<Vec<MarketplaceOrder>>;
}

pub struct HttpMarketplace {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpMarketplace {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[derive(Serialize)]
struct PlaceOrderBody<'a> {
    external_id: &'a str,
    products: &'a [ProductLine],
}

#[async_trait]
impl MarketplaceApi for HttpMarketplace {
    async fn place_order(
        &self,
        products: &[ProductLine],
        external_id: &str,
    ) -> ServiceResult<MarketplaceOrder> {
        let response = self
            .client
            .post(self.url("/v1/orders"))
            .bearer_auth(&self.api_key)
            .json(&PlaceOrderBody {
                external_id,
                products,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(ServiceError::DuplicateExternalId(external_id.to_string())),
            status if status.is_server_error() => Err(ServiceError::Transient(format!(
                "Marketplace place_order returned {status}"
            ))),
            status if !status.is_success() => Err(ServiceError::Business(format!(
                "Marketplace place_order returned {status}"
            ))),
            _ => Ok(response.json::<MarketplaceOrder>().await?),
        }
    }

    async fn get_order_status(&self, marketplace_order_id: &str) -> ServiceResult<String> {
        let order: MarketplaceOrder = self
            .client
            .get(self.url(&format!("/v1/orders/{marketplace_order_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(order.status)
    }

    async fn get_keys(&self, marketplace_order_id: &str) -> ServiceResult<Vec<MarketplaceKey>> {
        Ok(self
            .client
            .get(self.url(&format!("/v1/orders/{marketplace_order_id}/keys")))
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn search_orders(&self, external_id: &str) -> ServiceResult<Vec<MarketplaceOrder>> {
        Ok(self
            .client
            .get(self.url("/v1/orders"))
            .bearer_auth(&self.api_key)
            .query(&[("external_id", external_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
