// 上传错误分类
//
// - ConfigurationError：提交批次时即可判定，整批拒绝
// - ResolutionError / TransferError：在单文件上传单元内捕获，只影响该文件

use thiserror::Error;

/// 配置错误（后端地址缺失、并发上限非法等）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// 未配置后端地址
    #[error("后端地址未配置，请设置 api.base_url 或环境变量 {0}")]
    MissingApiUrl(&'static str),
    /// 后端地址无法解析
    #[error("后端地址无效: {0}")]
    InvalidApiUrl(String),
    /// 并发上限为 0
    #[error("最大并发上传数必须大于 0")]
    InvalidConcurrency,
}

/// 获取上传目标地址失败
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// 请求未能送达后端（网络错误、超时）
    #[error("请求上传地址失败: {0}")]
    Request(#[from] reqwest::Error),
    /// 后端拒绝请求
    #[error("后端拒绝上传地址请求: status={status}, body={body}")]
    Rejected { status: u16, body: String },
    /// 后端响应无法解析
    #[error("上传地址响应无效: {0}")]
    InvalidResponse(String),
}

/// 获取目标地址后，文件内容未能送达
#[derive(Debug, Error)]
pub enum TransferError {
    /// 请求发送失败（网络错误、超时）
    #[error("传输请求失败: {0}")]
    Request(#[from] reqwest::Error),
    /// 存储端拒绝写入
    #[error("存储端拒绝上传: status={status}, body={body}")]
    Rejected { status: u16, body: String },
    /// 目标地址携带的请求头非法
    #[error("上传目标无效: {0}")]
    InvalidDestination(String),
}

/// 单文件上传单元的失败原因
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// 上传单元内部 panic
    #[error("上传单元异常终止: {0}")]
    Aborted(String),
}

impl UploadError {
    /// 失败阶段名称（用于日志和事件）
    pub fn stage(&self) -> &'static str {
        match self {
            UploadError::Resolution(_) => "resolve",
            UploadError::Transfer(_) => "transfer",
            UploadError::Aborted(_) => "aborted",
        }
    }
}

/// 提交批次被同步拒绝的原因
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// 同一批次中出现重名文件（文件名即进度标识）
    #[error("同一批次中存在重名文件: {0}")]
    DuplicateFileName(String),
}
