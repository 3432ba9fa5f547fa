// 文件内容传输
//
// 把文件字节 PUT 到解析得到的目标地址。请求体按固定大小分块流式发送，
// 每个分块被 HTTP 客户端取走时上报一次累计字节数。

use crate::uploader::error::TransferError;
use crate::uploader::resolver::Destination;
use crate::uploader::task::FileHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// 默认分块大小 (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 文件传输器
#[async_trait]
pub trait Transporter: Send + Sync {
    /// 传输文件内容，期间可多次调用 `on_progress(bytes_sent, bytes_total)`
    async fn transfer(
        &self,
        file: &FileHandle,
        destination: Destination,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<(), TransferError>;
}

/// 传输超时下限（秒）
const MIN_TRANSFER_TIMEOUT_SECS: u64 = 30;

/// 估算传输超时时假定的最低吞吐 (32KB/s)
const MIN_THROUGHPUT_BYTES_PER_SEC: u64 = 32 * 1024;

/// 基于 HTTP PUT 的传输器
#[derive(Debug, Clone)]
pub struct HttpTransporter {
    client: Client,
    chunk_size: usize,
    request_timeout: Duration,
}

impl HttpTransporter {
    /// 创建传输器
    ///
    /// # 参数
    /// * `request_timeout` - 连接超时，同时作为整次传输超时的基数
    /// * `chunk_size` - 请求体分块大小（字节）
    pub fn new(request_timeout: Duration, chunk_size: usize) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self::with_client(client, chunk_size, request_timeout))
    }

    pub fn with_client(client: Client, chunk_size: usize, request_timeout: Duration) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            request_timeout,
        }
    }

    /// 按文件大小计算整次传输的超时
    ///
    /// 基数不低于 30 秒，再按最低吞吐为每个字节追加时间
    pub fn transfer_timeout(&self, file_size: u64) -> Duration {
        let base = self
            .request_timeout
            .max(Duration::from_secs(MIN_TRANSFER_TIMEOUT_SECS));
        base + Duration::from_secs(file_size.div_ceil(MIN_THROUGHPUT_BYTES_PER_SEC))
    }
}

/// 将文件内容切分为分块（共享底层内存，不复制）
fn split_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

/// 构建传输请求头：目标自带的请求头 + Content-Type + Content-Length
fn build_headers(file: &FileHandle, destination: &Destination) -> Result<HeaderMap, TransferError> {
    let mut headers = HeaderMap::new();

    for (name, value) in &destination.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransferError::InvalidDestination(format!("请求头名称非法 {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransferError::InvalidDestination(format!("请求头取值非法 {}: {}", name, e)))?;
        headers.insert(name, value);
    }

    let content_type = HeaderValue::from_str(&file.content_type)
        .map_err(|e| TransferError::InvalidDestination(format!("内容类型非法 {}: {}", file.content_type, e)))?;
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(file.size()));

    Ok(headers)
}

#[async_trait]
impl Transporter for HttpTransporter {
    async fn transfer(
        &self,
        file: &FileHandle,
        destination: Destination,
        on_progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<(), TransferError> {
        let headers = build_headers(file, &destination)?;
        let total = file.size();

        // 分块被请求体取走时通过通道上报累计字节数
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u64>();
        let mut sent = 0u64;
        let chunks = split_chunks(&file.data, self.chunk_size)
            .into_iter()
            .map(move |chunk| {
                sent += chunk.len() as u64;
                let _ = progress_tx.send(sent);
                Ok::<Bytes, std::io::Error>(chunk)
            });
        let body = Body::wrap_stream(futures::stream::iter(chunks));

        debug!(
            "开始传输: file={}, size={}, host={:?}",
            file.name,
            total,
            destination.url.host_str()
        );

        let request = self
            .client
            .put(destination.url)
            .timeout(self.transfer_timeout(total))
            .headers(headers)
            .body(body)
            .send();
        tokio::pin!(request);

        let response = loop {
            tokio::select! {
                Some(sent) = progress_rx.recv() => on_progress(sent, total),
                result = &mut request => break result?,
            }
        };

        // 请求结束前已取走但尚未上报的分块
        while let Ok(sent) = progress_rx.try_recv() {
            on_progress(sent, total);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("传输完成: file={}, status={}", file.name, status);
        Ok(())
    }
}
