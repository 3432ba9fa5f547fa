// 上传模块
//
// - task: 文件句柄与上传条目状态机
// - progress: 进度存储
// - resolver: 上传地址解析（预签名 URL）
// - transporter: 文件内容传输（HTTP PUT）
// - scheduler: 有界并发调度器

pub mod error;
pub mod progress;
pub mod resolver;
pub mod scheduler;
pub mod task;
pub mod transporter;

pub use error::{BatchError, ConfigurationError, ResolutionError, TransferError, UploadError};
pub use progress::{percentage, ProgressStore, TransferProgress};
pub use resolver::{Destination, DestinationResolver, HttpDestinationResolver};
pub use scheduler::{
    BatchHandle, BatchReport, BatchSnapshot, EntrySnapshot, SchedulerOptions, UploadScheduler,
};
pub use task::{guess_content_type, FileHandle, UploadEntry, UploadTaskStatus};
pub use transporter::{HttpTransporter, Transporter, DEFAULT_CHUNK_SIZE};

/// 默认最大同时上传数
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;
