// 上传进度存储
//
// 以文件名为键记录最近一次进度，按批次重置。同一文件的 bytes_sent
// 单调递增由传输层保证，这里只做后写覆盖。

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;

/// 单次进度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    /// 文件标识（文件名）
    pub identity: String,
    /// 已发送字节数
    pub bytes_sent: u64,
    /// 总字节数，0 表示未知
    pub bytes_total: u64,
}

impl TransferProgress {
    pub fn new(identity: impl Into<String>, bytes_sent: u64, bytes_total: u64) -> Self {
        Self {
            identity: identity.into(),
            bytes_sent,
            bytes_total,
        }
    }

    /// 百分比进度，四舍五入并限制在 [0, 100]
    pub fn percentage(&self) -> u8 {
        percentage(self.bytes_sent, self.bytes_total)
    }
}

/// 计算百分比：`round(sent * 100 / total)`，total 为 0 时返回 0
pub fn percentage(bytes_sent: u64, bytes_total: u64) -> u8 {
    if bytes_total == 0 {
        return 0;
    }
    let sent = bytes_sent as u128;
    let total = bytes_total as u128;
    let rounded = (sent * 200 + total) / (total * 2);
    rounded.min(100) as u8
}

/// 进度存储
#[derive(Debug, Default)]
pub struct ProgressStore {
    entries: DashMap<String, TransferProgress>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录进度（后写覆盖）
    pub fn record_progress(&self, identity: &str, bytes_sent: u64, bytes_total: u64) {
        self.entries.insert(
            identity.to_string(),
            TransferProgress::new(identity, bytes_sent, bytes_total),
        );
    }

    /// 所有文件的百分比快照
    pub fn get_all(&self) -> HashMap<String, u8> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().percentage()))
            .collect()
    }

    /// 单个文件的百分比
    pub fn get(&self, identity: &str) -> Option<u8> {
        self.entries.get(identity).map(|entry| entry.percentage())
    }

    /// 清空所有记录（新批次开始时调用）
    pub fn reset(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
