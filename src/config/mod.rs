// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 上传接口地址的环境变量名（优先级高于配置文件）
pub const API_URL_ENV: &str = "UPLOADER_API_URL";

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 后端接口配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（按天滚动，默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// CORS允许的源
    pub cors_origins: Vec<String>,
    /// 单次提交请求体上限 (MB)
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

fn default_max_body_size_mb() -> usize {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18890,
            cors_origins: vec!["*".to_string()],
            max_body_size_mb: default_max_body_size_mb(),
        }
    }
}

/// 后端接口配置
///
/// `base_url` 缺省时服务仍可启动，但每次提交批次都会以配置错误被拒绝
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 后端基础地址，如 `https://backend.example.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// 获取预签名地址的接口路径
    #[serde(default = "default_presign_path")]
    pub presign_path: String,
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_presign_path() -> String {
    "/api/get-presigned-url".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            presign_path: default_presign_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 最大同时上传文件数
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// 请求体流式分块大小 (KB)，决定进度回调粒度
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: usize,
    /// 进度事件最小发布间隔（毫秒）
    #[serde(default = "default_progress_throttle_ms")]
    pub progress_throttle_ms: u64,
    /// 允许上传的内容类型，支持 `image/*` 形式的前缀通配
    #[serde(default = "default_accepted_types")]
    pub accepted_types: Vec<String>,
}

fn default_max_concurrent_uploads() -> usize {
    crate::uploader::DEFAULT_MAX_CONCURRENT_UPLOADS
}

fn default_chunk_size_kb() -> usize {
    64
}

fn default_progress_throttle_ms() -> u64 {
    200
}

fn default_accepted_types() -> Vec<String> {
    vec!["image/*".to_string(), "application/pdf".to_string()]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent_uploads(),
            chunk_size_kb: default_chunk_size_kb(),
            progress_throttle_ms: default_progress_throttle_ms(),
            accepted_types: default_accepted_types(),
        }
    }
}

impl UploadConfig {
    /// 判断内容类型是否在允许列表中
    ///
    /// 列表为空时接受所有类型
    pub fn accepts(&self, content_type: &str) -> bool {
        if self.accepted_types.is_empty() {
            return true;
        }

        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        self.accepted_types.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            match pattern.strip_suffix("/*") {
                Some(prefix) => content_type
                    .split_once('/')
                    .map(|(major, _)| major == prefix)
                    .unwrap_or(false),
                None => pattern == "*/*" || pattern == content_type,
            }
        })
    }

    /// 分块大小（字节）
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_kb.max(1) * 1024
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    ///
    /// 只有文件不存在时才写入默认配置；已有文件解析或校验失败时返回错误，
    /// 不覆盖用户的配置
    pub async fn load_or_default(path: &str) -> Result<Self> {
        match fs::metadata(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("配置文件不存在，使用默认配置: {}", path);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }

                Ok(default_config)
            }
            _ => {
                let config = Self::load_from_file(path)
                    .await
                    .with_context(|| format!("配置文件无效，请修正后重新启动: {}", path))?;
                tracing::info!("配置文件加载成功: {}", path);
                Ok(config)
            }
        }
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_concurrent_uploads == 0 {
            anyhow::bail!("upload.max_concurrent_uploads 必须大于 0");
        }
        if self.upload.chunk_size_kb == 0 {
            anyhow::bail!("upload.chunk_size_kb 必须大于 0");
        }
        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("api.request_timeout_secs 必须大于 0");
        }
        Ok(())
    }

    /// 应用环境变量覆盖
    ///
    /// `UPLOADER_API_URL` 非空时覆盖 `api.base_url`
    pub fn apply_env_overrides(&mut self) {
        self.apply_api_url_override(std::env::var(API_URL_ENV).ok());
    }

    fn apply_api_url_override(&mut self, value: Option<String>) {
        if let Some(url) = value.map(|v| v.trim().to_string()) {
            if !url.is_empty() {
                tracing::info!("使用环境变量 {} 覆盖后端地址: {}", API_URL_ENV, url);
                self.api.base_url = Some(url);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 18890);
        assert_eq!(config.upload.max_concurrent_uploads, 3);
        assert_eq!(config.api.presign_path, "/api/get-presigned-url");
        assert!(config.api.base_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut config = AppConfig::default();
        config.api.base_url = Some("https://backend.example.com".to_string());
        config.upload.max_concurrent_uploads = 5;
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.upload.max_concurrent_uploads, 5);
        assert_eq!(
            loaded.api.base_url.as_deref(),
            Some("https://backend.example.com")
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [api]
            base_url = "http://localhost:3000"
            "#,
        )
        .unwrap();

        assert_eq!(config.api.base_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.api.request_timeout_secs, 60);
        assert_eq!(config.upload.max_concurrent_uploads, 3);
        assert_eq!(config.upload.accepted_types.len(), 2);
        assert!(config.log.enabled);
    }

    #[tokio::test]
    async fn test_load_rejects_zero_concurrency() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[upload]\nmax_concurrent_uploads = 0\n").unwrap();

        let result = AppConfig::load_from_file(temp_file.path().to_str().unwrap()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_creates_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await.unwrap();

        assert_eq!(config.upload.max_concurrent_uploads, 3);
        let written = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(written.server.port, 18890);
    }

    #[tokio::test]
    async fn test_load_or_default_keeps_invalid_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let original = "[api]\nbase_url = \"https://my-backend.example\"\n\n[upload]\nmax_concurrent_uploads = 0\n";
        std::fs::write(temp_file.path(), original).unwrap();
        let path = temp_file.path().to_str().unwrap();

        assert!(AppConfig::load_or_default(path).await.is_err());

        // 用户文件保持原样
        let on_disk = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(on_disk, original);
    }

    #[tokio::test]
    async fn test_load_or_default_keeps_unparsable_file() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[api\nbase_url = ").unwrap();
        let path = temp_file.path().to_str().unwrap();

        assert!(AppConfig::load_or_default(path).await.is_err());
        assert_eq!(
            std::fs::read_to_string(temp_file.path()).unwrap(),
            "[api\nbase_url = "
        );
    }

    #[test]
    fn test_api_url_override() {
        let mut config = AppConfig::default();

        // 空值不覆盖
        config.apply_api_url_override(Some("   ".to_string()));
        assert!(config.api.base_url.is_none());

        config.apply_api_url_override(Some(" https://api.example.com ".to_string()));
        assert_eq!(config.api.base_url.as_deref(), Some("https://api.example.com"));

        config.apply_api_url_override(None);
        assert_eq!(config.api.base_url.as_deref(), Some("https://api.example.com"));
    }

    #[test]
    fn test_accepted_types() {
        let upload = UploadConfig::default();

        assert!(upload.accepts("image/png"));
        assert!(upload.accepts("IMAGE/JPEG"));
        assert!(upload.accepts("application/pdf"));
        assert!(upload.accepts("application/pdf; charset=binary"));
        assert!(!upload.accepts("text/plain"));
        assert!(!upload.accepts("imagery"));

        let open = UploadConfig {
            accepted_types: Vec::new(),
            ..UploadConfig::default()
        };
        assert!(open.accepts("text/plain"));
    }
}
