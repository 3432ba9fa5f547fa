// Presigned Uploader Library
// 预签名地址批量上传服务核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// Web服务器模块
pub mod server;

// 上传调度模块
pub mod uploader;

// 导出常用类型
pub use config::AppConfig;
pub use server::{build_router, AppState};
pub use uploader::{
    BatchError, BatchHandle, BatchReport, FileHandle, ProgressStore, UploadEntry,
    UploadScheduler, UploadTaskStatus,
};
