// 应用状态

use crate::config::AppConfig;
use crate::uploader::{
    HttpDestinationResolver, HttpTransporter, SchedulerOptions, UploadScheduler,
};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
    /// 上传调度器
    pub scheduler: UploadScheduler,
}

impl AppState {
    /// 按配置创建应用状态
    ///
    /// 接口地址格式错误或并发上限为 0 时直接失败；
    /// 接口地址缺失时仍可启动，提交批次时再报配置错误
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let resolver = HttpDestinationResolver::from_config(&config.api)?;

        let transporter = HttpTransporter::new(
            Duration::from_secs(config.api.request_timeout_secs),
            config.upload.chunk_size_bytes(),
        )?;

        let scheduler = UploadScheduler::new(
            Arc::new(resolver),
            Arc::new(transporter),
            SchedulerOptions::from(&config.upload),
        )
        .context("创建上传调度器失败")?;

        Ok(Self::with_scheduler(config, scheduler))
    }

    /// 使用已有调度器创建应用状态
    pub fn with_scheduler(config: AppConfig, scheduler: UploadScheduler) -> Self {
        Self {
            config: Arc::new(config),
            scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_without_api_url() {
        let state = AppState::new(AppConfig::default()).unwrap();
        assert_eq!(state.scheduler.max_concurrent(), 3);
        assert_eq!(state.scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_api_url() {
        let mut config = AppConfig::default();
        config.api.base_url = Some("not a url".to_string());
        assert!(AppState::new(config).is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.upload.max_concurrent_uploads = 0;
        assert!(AppState::new(config).is_err());
    }
}
