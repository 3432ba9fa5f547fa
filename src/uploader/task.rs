// 上传条目定义
//
// FileHandle 是入队后不可变的文件引用，UploadEntry 记录其在批次内的生命周期：
// Pending → InFlight → {Completed | Failed}

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// 待上传文件
///
/// `name` 同时作为进度标识，同一批次内必须唯一
#[derive(Debug, Clone)]
pub struct FileHandle {
    /// 文件名
    pub name: String,
    /// 内容类型，如 `image/png`
    pub content_type: String,
    /// 文件内容
    pub data: Bytes,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// 从本地文件构建，内容类型按扩展名推断
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("无法获取文件名: {:?}", path))?;

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取文件失败: {:?}", path))?;

        Ok(Self::new(name, guess_content_type(path), data))
    }

    /// 文件大小（字节）
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// 按文件名推断内容类型，无法识别时返回 `application/octet-stream`
pub fn guess_content_type<P: AsRef<Path>>(path: P) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// 上传条目状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadTaskStatus {
    /// 等待中
    Pending,
    /// 上传中（已占用并发槽位）
    InFlight,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

impl UploadTaskStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadTaskStatus::Completed | UploadTaskStatus::Failed)
    }
}

/// 批次内的上传条目
#[derive(Debug, Clone, Serialize)]
pub struct UploadEntry {
    /// 条目ID
    pub id: String,
    /// 文件名（进度标识）
    pub file_name: String,
    /// 内容类型
    pub content_type: String,
    /// 文件大小
    pub total_size: u64,
    /// 状态
    pub status: UploadTaskStatus,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) file: FileHandle,
}

impl UploadEntry {
    pub fn new(file: FileHandle) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file.name.clone(),
            content_type: file.content_type.clone(),
            total_size: file.size(),
            status: UploadTaskStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
            file,
        }
    }

    /// 标记为上传中
    ///
    /// 只有 Pending 条目可以被派发，返回 false 表示状态未变
    pub fn mark_in_flight(&mut self) -> bool {
        if self.status != UploadTaskStatus::Pending {
            return false;
        }
        self.status = UploadTaskStatus::InFlight;
        self.started_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) -> bool {
        if self.status != UploadTaskStatus::InFlight {
            return false;
        }
        self.status = UploadTaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) -> bool {
        if self.status != UploadTaskStatus::InFlight {
            return false;
        }
        self.status = UploadTaskStatus::Failed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error = Some(error);
        true
    }

    /// 文件引用
    pub fn file(&self) -> &FileHandle {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> UploadEntry {
        UploadEntry::new(FileHandle::new("photo.png", "image/png", vec![0u8; 1024]))
    }

    #[test]
    fn test_entry_creation() {
        let entry = sample_entry();

        assert_eq!(entry.status, UploadTaskStatus::Pending);
        assert_eq!(entry.file_name, "photo.png");
        assert_eq!(entry.total_size, 1024);
        assert!(entry.started_at.is_none());
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_status_transitions() {
        let mut entry = sample_entry();

        assert!(entry.mark_in_flight());
        assert_eq!(entry.status, UploadTaskStatus::InFlight);
        assert!(entry.started_at.is_some());

        // 同一条目不能被二次派发
        assert!(!entry.mark_in_flight());

        assert!(entry.mark_completed());
        assert_eq!(entry.status, UploadTaskStatus::Completed);
        assert!(entry.completed_at.is_some());
        assert!(entry.status.is_terminal());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut entry = sample_entry();

        // 未派发的条目不能直接进入终态
        assert!(!entry.mark_completed());
        assert!(!entry.mark_failed("boom".to_string()));

        entry.mark_in_flight();
        assert!(entry.mark_failed("Network error".to_string()));
        assert_eq!(entry.error.as_deref(), Some("Network error"));

        assert!(!entry.mark_completed());
        assert_eq!(entry.status, UploadTaskStatus::Failed);
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("a/b/report.pdf"), "application/pdf");
        assert_eq!(guess_content_type("cat.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("unknown.zzzz"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let file = FileHandle::from_path(&path).await.unwrap();
        assert_eq!(file.name, "logo.png");
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.size(), 16);

        assert!(FileHandle::from_path(dir.path().join("missing.png")).await.is_err());
    }
}
