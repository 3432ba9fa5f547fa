// 上传目标解析
//
// 向后端申请单个文件的预签名上传地址。每个 Destination 只用于一次传输。

use crate::config::{ApiConfig, API_URL_ENV};
use crate::uploader::error::{ConfigurationError, ResolutionError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 上传目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// 上传地址（通常为预签名 URL）
    pub url: Url,
    /// 传输时需附带的请求头
    pub headers: HashMap<String, String>,
}

/// 上传目标解析器
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    /// 提交批次前的配置检查，失败时整批拒绝
    fn ensure_configured(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// 为单个文件申请上传目标
    async fn resolve(&self, file_name: &str, content_type: &str) -> Result<Destination, ResolutionError>;
}

/// 预签名地址请求体
#[derive(Debug, Serialize)]
struct PresignRequest<'a> {
    filename: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
}

/// 预签名地址响应
#[derive(Debug, Deserialize)]
struct PresignResponse {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// 基于 HTTP 的解析器：`POST {base_url}{presign_path}`
#[derive(Debug, Clone)]
pub struct HttpDestinationResolver {
    client: Client,
    /// 未配置后端地址时为 None
    endpoint: Option<Url>,
}

impl HttpDestinationResolver {
    /// 从配置创建解析器
    ///
    /// 后端地址缺失不会在这里报错，而是在提交批次时返回配置错误；
    /// 地址格式非法则直接返回错误
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = match config.base_url.as_deref() {
            Some(base) => Some(build_endpoint(base, &config.presign_path)?),
            None => None,
        };

        match &endpoint {
            Some(url) => info!("上传地址解析接口: {}", url),
            None => warn!("未配置后端地址，提交批次将被拒绝"),
        }

        Ok(Self { client, endpoint })
    }

    /// 使用现成的客户端和接口地址
    pub fn with_client(client: Client, endpoint: Option<Url>) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }
}

/// 拼接接口地址，保留 base_url 自带的路径前缀
fn build_endpoint(base: &str, path: &str) -> Result<Url, ConfigurationError> {
    let joined = format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ConfigurationError::InvalidApiUrl(format!("{}: {}", joined, e)))
}

#[async_trait]
impl DestinationResolver for HttpDestinationResolver {
    fn ensure_configured(&self) -> Result<(), ConfigurationError> {
        match self.endpoint {
            Some(_) => Ok(()),
            None => Err(ConfigurationError::MissingApiUrl(API_URL_ENV)),
        }
    }

    async fn resolve(&self, file_name: &str, content_type: &str) -> Result<Destination, ResolutionError> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            ResolutionError::InvalidResponse(ConfigurationError::MissingApiUrl(API_URL_ENV).to_string())
        })?;

        debug!("申请上传地址: file={}, type={}", file_name, content_type);

        let response = self
            .client
            .post(endpoint.clone())
            .json(&PresignRequest {
                filename: file_name,
                content_type,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolutionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let presign: PresignResponse = serde_json::from_str(&body)
            .map_err(|e| ResolutionError::InvalidResponse(format!("{}: {}", e, body)))?;

        let url = Url::parse(&presign.url)
            .map_err(|e| ResolutionError::InvalidResponse(format!("{}: {}", e, presign.url)))?;

        debug!("上传地址获取成功: file={}, host={:?}", file_name, url.host_str());

        Ok(Destination {
            url,
            headers: presign.headers,
        })
    }
}
