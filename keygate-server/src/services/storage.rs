//! Object Storage
//!
//! 密钥密文保管库。对象路径按 `{order_id}/{item_id}` 命名空间隔离；
//! 取回链接是 HMAC 签名 + 过期时间戳的 URL，默认 3 小时有效。
//! 文件系统实现落在 work_dir 下，签名密钥独立于其他密钥配置。

use async_trait::async_trait;
use tokio::fs;

use super::{ServiceError, ServiceResult};
use crate::utils::signature;
use shared::util::now_secs;

#[async_trait]
pub trait StorageClient: Send + Sync {
    /// 写入密文，返回对象引用（`{order_id}/{item_id}`）
    async fn upload_raw(
        &self,
        order_id: &str,
        item_id: &str,
        content: &[u8],
        content_type: &str,
    ) -> ServiceResult<String>;

    /// 签发限时取回链接
    async fn signed_url(&self, object_ref: &str, ttl_secs: u64) -> ServiceResult<String>;

    /// 恢复路径用：对象是否已落盘
    async fn exists(&self, object_ref: &str) -> ServiceResult<bool>;

    /// 读回密文（下载端点）
    async fn fetch(&self, object_ref: &str) -> ServiceResult<Vec<u8>>;
}

/// 文件系统保管库
pub struct FsVault {
    root: std::path::PathBuf,
    url_secret: String,
    public_base_url: String,
}

impl FsVault {
    pub fn new(root: impl Into<std::path::PathBuf>, url_secret: &str, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            url_secret: url_secret.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// 签名输入：对象引用 + 过期时间戳，二者任一被改签名即失效
    fn signing_input(object_ref: &str, expires_at: i64) -> String {
        format!("{object_ref}:{expires_at}")
    }

    /// 下载端点校验签名与有效期
    pub fn verify_url(&self, object_ref: &str, expires_at: i64, sig_hex: &str) -> bool {
        if expires_at < now_secs() {
            return false;
        }
        signature::verify_raw_sha256(
            Self::signing_input(object_ref, expires_at).as_bytes(),
            sig_hex,
            &self.url_secret,
        )
    }

    fn object_path(&self, object_ref: &str) -> ServiceResult<std::path::PathBuf> {
        // 对象引用来自内部 ID，仍拒绝任何路径穿越成分
        if object_ref.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(ServiceError::Business(format!(
                "Invalid object ref: {object_ref}"
            )));
        }
        Ok(self.root.join(object_ref))
    }
}

#[async_trait]
impl StorageClient for FsVault {
    async fn upload_raw(
        &self,
        order_id: &str,
        item_id: &str,
        content: &[u8],
        _content_type: &str,
    ) -> ServiceResult<String> {
        let object_ref = format!("{order_id}/{item_id}");
        let path = self.object_path(&object_ref)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::Transient(format!("Vault mkdir failed: {e}")))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| ServiceError::Transient(format!("Vault write failed: {e}")))?;
        Ok(object_ref)
    }

    async fn signed_url(&self, object_ref: &str, ttl_secs: u64) -> ServiceResult<String> {
        let expires_at = now_secs() + ttl_secs as i64;
        let sig = signature::sign_raw_sha256(
            Self::signing_input(object_ref, expires_at).as_bytes(),
            &self.url_secret,
        );
        Ok(format!(
            "{}/download/{object_ref}?exp={expires_at}&sig={sig}",
            self.public_base_url
        ))
    }

    async fn exists(&self, object_ref: &str) -> ServiceResult<bool> {
        let path = self.object_path(object_ref)?;
        Ok(fs::try_exists(&path)
            .await
            .map_err(|e| ServiceError::Transient(format!("Vault stat failed: {e}")))?)
    }

    async fn fetch(&self, object_ref: &str) -> ServiceResult<Vec<u8>> {
        let path = self.object_path(object_ref)?;
        fs::read(&path)
            .await
            .map_err(|e| ServiceError::Business(format!("Vault object missing: {e}")))
    }
}
