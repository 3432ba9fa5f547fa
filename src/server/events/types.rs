//! 上传事件类型
//!
//! 调度器通过 broadcast 通道发布，WebSocket 连接订阅后原样转发给前端

use serde::{Deserialize, Serialize};

/// 上传事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 新批次已提交
    BatchSubmitted { batch_id: u64, total: usize },
    /// 文件已派发（进入上传中）
    Dispatched { batch_id: u64, file_name: String },
    /// 进度更新
    Progress {
        batch_id: u64,
        file_name: String,
        bytes_sent: u64,
        bytes_total: u64,
        progress: u8,
    },
    /// 文件上传完成
    Completed { batch_id: u64, file_name: String },
    /// 文件上传失败
    Failed {
        batch_id: u64,
        file_name: String,
        stage: String,
        error: String,
    },
    /// 批次内所有文件均已结束
    BatchFinished {
        batch_id: u64,
        completed: usize,
        failed: usize,
        discarded: usize,
    },
}

impl UploadEvent {
    /// 所属批次
    pub fn batch_id(&self) -> u64 {
        match self {
            UploadEvent::BatchSubmitted { batch_id, .. }
            | UploadEvent::Dispatched { batch_id, .. }
            | UploadEvent::Progress { batch_id, .. }
            | UploadEvent::Completed { batch_id, .. }
            | UploadEvent::Failed { batch_id, .. }
            | UploadEvent::BatchFinished { batch_id, .. } => *batch_id,
        }
    }

    /// 关联的文件名（批次级事件返回 None）
    pub fn file_name(&self) -> Option<&str> {
        match self {
            UploadEvent::Dispatched { file_name, .. }
            | UploadEvent::Progress { file_name, .. }
            | UploadEvent::Completed { file_name, .. }
            | UploadEvent::Failed { file_name, .. } => Some(file_name),
            UploadEvent::BatchSubmitted { .. } | UploadEvent::BatchFinished { .. } => None,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::BatchSubmitted { .. } => "batch_submitted",
            UploadEvent::Dispatched { .. } => "dispatched",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Completed { .. } => "completed",
            UploadEvent::Failed { .. } => "failed",
            UploadEvent::BatchFinished { .. } => "batch_finished",
        }
    }

    /// 是否为文件终态事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadEvent::Completed { .. } | UploadEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_tagged() {
        let event = UploadEvent::Progress {
            batch_id: 2,
            file_name: "a.png".to_string(),
            bytes_sent: 50,
            bytes_total: 100,
            progress: 50,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "progress");
        assert_eq!(json["file_name"], "a.png");
        assert_eq!(json["progress"], 50);
        assert_eq!(event.event_type_name(), "progress");
    }

    #[test]
    fn test_accessors() {
        let failed = UploadEvent::Failed {
            batch_id: 7,
            file_name: "b.pdf".to_string(),
            stage: "resolve".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(failed.batch_id(), 7);
        assert_eq!(failed.file_name(), Some("b.pdf"));
        assert!(failed.is_terminal());

        let finished = UploadEvent::BatchFinished {
            batch_id: 7,
            completed: 1,
            failed: 1,
            discarded: 0,
        };
        assert_eq!(finished.file_name(), None);
        assert!(!finished.is_terminal());
    }
}
