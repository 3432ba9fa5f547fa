// 上传调度器
//
// 管理一个批次的上传：
// - 等待队列（FIFO，提交顺序即上传顺序）
// - 并发槽位（同时上传数不超过上限）
// - 单文件上传单元：申请上传地址 → 传输内容 → 结算并补位
// - 失败隔离：单个文件的失败只影响该文件
//
// 并发模型：
// - 上传中计数和批次状态由同一把锁保护，锁只在出队/计数/结算时短暂持有，
//   从不跨越网络 I/O
// - 上传中计数跨批次共享：重新提交不会取消已派发的上传，旧上传结束前仍占用槽位
// - 上传单元结算后立即补位，无需后台轮询

use crate::config::UploadConfig;
use crate::server::events::{ProgressThrottler, UploadEvent, DEFAULT_THROTTLE_INTERVAL_MS};
use crate::uploader::error::{BatchError, ConfigurationError, UploadError};
use crate::uploader::progress::{percentage, ProgressStore};
use crate::uploader::resolver::DestinationResolver;
use crate::uploader::task::{FileHandle, UploadEntry, UploadTaskStatus};
use crate::uploader::transporter::Transporter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 批次执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// 批次ID（从 1 开始递增，0 表示尚未提交过批次）
    pub batch_id: u64,
    /// 文件总数
    pub total: usize,
    /// 已完成
    pub completed: usize,
    /// 已失败
    pub failed: usize,
    /// 未派发即被新批次替换
    pub discarded: usize,
}

impl BatchReport {
    /// 已结算的文件数
    pub fn settled(&self) -> usize {
        self.completed + self.failed + self.discarded
    }

    /// 批次内所有文件均已结束
    pub fn is_finished(&self) -> bool {
        self.settled() >= self.total
    }
}

/// 批次句柄
///
/// 提交后立即返回，可选择等待批次结束
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: u64,
    total: usize,
    report_rx: watch::Receiver<BatchReport>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// 当前结果快照
    pub fn report(&self) -> BatchReport {
        self.report_rx.borrow().clone()
    }

    /// 等待批次结束
    ///
    /// 依赖上传地址解析和传输调用最终返回，不设超时
    pub async fn wait(mut self) -> BatchReport {
        if let Ok(report) = self.report_rx.wait_for(BatchReport::is_finished).await {
            return report.clone();
        }
        self.report()
    }
}

/// 调度器参数
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// 最大同时上传数
    pub max_concurrent: usize,
    /// 进度事件发布间隔
    pub progress_throttle: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: crate::uploader::DEFAULT_MAX_CONCURRENT_UPLOADS,
            progress_throttle: Duration::from_millis(DEFAULT_THROTTLE_INTERVAL_MS),
        }
    }
}

impl From<&UploadConfig> for SchedulerOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_uploads,
            progress_throttle: Duration::from_millis(config.progress_throttle_ms),
        }
    }
}

/// 条目快照（附带当前进度百分比）
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    #[serde(flatten)]
    pub entry: UploadEntry,
    pub progress: u8,
}

/// 当前批次快照
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub report: BatchReport,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub entries: Vec<EntrySnapshot>,
}

/// 批次状态，每次提交整体替换
struct BatchState {
    id: u64,
    entries: Vec<UploadEntry>,
    /// 等待派发的条目下标
    pending: VecDeque<usize>,
    report_tx: Arc<watch::Sender<BatchReport>>,
}

impl BatchState {
    fn empty() -> Self {
        let (report_tx, _) = watch::channel(BatchReport::default());
        Self {
            id: 0,
            entries: Vec::new(),
            pending: VecDeque::new(),
            report_tx: Arc::new(report_tx),
        }
    }
}

struct SchedulerState {
    /// 上传中数量（跨批次）
    in_flight: usize,
    batch: BatchState,
}

/// 已派发的上传单元
#[derive(Clone)]
struct DispatchedUnit {
    batch_id: u64,
    index: usize,
    file: FileHandle,
    report_tx: Arc<watch::Sender<BatchReport>>,
}

struct SchedulerInner {
    resolver: Arc<dyn DestinationResolver>,
    transporter: Arc<dyn Transporter>,
    progress: Arc<ProgressStore>,
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    next_batch_id: AtomicU64,
    events: broadcast::Sender<UploadEvent>,
}

/// 上传调度器
///
/// 克隆开销很小，所有克隆共享同一调度状态
#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl UploadScheduler {
    /// 创建调度器
    pub fn new(
        resolver: Arc<dyn DestinationResolver>,
        transporter: Arc<dyn Transporter>,
        options: SchedulerOptions,
    ) -> Result<Self, ConfigurationError> {
        if options.max_concurrent == 0 {
            return Err(ConfigurationError::InvalidConcurrency);
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            "上传调度器初始化: 最大并发={}, 进度节流={}ms",
            options.max_concurrent,
            options.progress_throttle.as_millis()
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                resolver,
                transporter,
                progress: Arc::new(ProgressStore::new()),
                options,
                state: Mutex::new(SchedulerState {
                    in_flight: 0,
                    batch: BatchState::empty(),
                }),
                next_batch_id: AtomicU64::new(0),
                events,
            }),
        })
    }

    /// 提交一个批次
    ///
    /// 新批次替换尚未派发的旧条目（计入旧批次的 discarded），已派发的上传继续执行。
    /// 配置错误和重名文件在这里同步返回，此时不会创建任何条目。
    ///
    /// 需要在 Tokio 运行时内调用
    pub fn submit_batch(&self, files: Vec<FileHandle>) -> Result<BatchHandle, BatchError> {
        let inner = &self.inner;

        inner.resolver.ensure_configured()?;

        let mut seen = HashSet::with_capacity(files.len());
        for file in &files {
            if !seen.insert(file.name.as_str()) {
                return Err(BatchError::DuplicateFileName(file.name.clone()));
            }
        }

        let batch_id = inner.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1;
        let total = files.len();
        let (report_tx, report_rx) = watch::channel(BatchReport {
            batch_id,
            total,
            ..BatchReport::default()
        });
        let report_tx = Arc::new(report_tx);

        let batch = BatchState {
            id: batch_id,
            entries: files.into_iter().map(UploadEntry::new).collect(),
            pending: (0..total).collect(),
            report_tx,
        };

        {
            let mut state = inner.state.lock();
            inner.progress.reset();
            let previous = std::mem::replace(&mut state.batch, batch);

            if !previous.pending.is_empty() {
                let discarded = previous.pending.len();
                warn!(
                    "批次 {} 被新批次 {} 替换，{} 个未派发文件已丢弃",
                    previous.id, batch_id, discarded
                );
                if let Some(report) =
                    update_report(&previous.report_tx, |r| r.discarded += discarded)
                {
                    inner.publish_finished(report);
                }
            }

            info!(
                "提交上传批次: batch_id={}, files={}, 最大并发={}",
                batch_id, total, inner.options.max_concurrent
            );
            inner.publish(UploadEvent::BatchSubmitted { batch_id, total });

            if total == 0 {
                let report = report_rx.borrow().clone();
                inner.publish_finished(report);
            }
        }

        inner.refill();

        Ok(BatchHandle {
            batch_id,
            total,
            report_rx,
        })
    }

    /// 所有文件的进度百分比
    pub fn progress(&self) -> HashMap<String, u8> {
        self.inner.progress.get_all()
    }

    /// 进度存储
    pub fn progress_store(&self) -> Arc<ProgressStore> {
        self.inner.progress.clone()
    }

    /// 当前批次的条目
    pub fn entries(&self) -> Vec<UploadEntry> {
        self.inner.state.lock().batch.entries.clone()
    }

    /// 当前批次中某个文件的状态
    pub fn entry_status(&self, file_name: &str) -> Option<UploadTaskStatus> {
        self.inner
            .state
            .lock()
            .batch
            .entries
            .iter()
            .find(|entry| entry.file_name == file_name)
            .map(|entry| entry.status)
    }

    /// 当前批次快照
    pub fn snapshot(&self) -> BatchSnapshot {
        let (report, in_flight, entries) = {
            let state = self.inner.state.lock();
            let report = state.batch.report_tx.borrow().clone();
            (report, state.in_flight, state.batch.entries.clone())
        };

        let progress = self.inner.progress.get_all();
        let entries = entries
            .into_iter()
            .map(|entry| EntrySnapshot {
                progress: progress.get(&entry.file_name).copied().unwrap_or(0),
                entry,
            })
            .collect();

        BatchSnapshot {
            report,
            in_flight,
            max_concurrent: self.inner.options.max_concurrent,
            entries,
        }
    }

    /// 当前批次的结果
    pub fn current_batch(&self) -> BatchReport {
        self.inner.state.lock().batch.report_tx.borrow().clone()
    }

    /// 上传中数量
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.options.max_concurrent
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }
}

impl SchedulerInner {
    /// 补位：槽位未满且有等待条目时持续派发
    fn refill(self: &Arc<Self>) {
        loop {
            let unit = {
                let mut state = self.state.lock();
                if state.in_flight >= self.options.max_concurrent {
                    break;
                }

                let batch = &mut state.batch;
                let Some(index) = batch.pending.pop_front() else {
                    break;
                };
                let entry = &mut batch.entries[index];
                if !entry.mark_in_flight() {
                    continue;
                }

                let unit = DispatchedUnit {
                    batch_id: batch.id,
                    index,
                    file: entry.file().clone(),
                    report_tx: batch.report_tx.clone(),
                };
                state.in_flight += 1;

                // 持锁发布，保证 Dispatched 事件顺序与出队顺序一致
                debug!(
                    "派发上传: batch_id={}, file={}",
                    unit.batch_id, unit.file.name
                );
                self.publish(UploadEvent::Dispatched {
                    batch_id: unit.batch_id,
                    file_name: unit.file.name.clone(),
                });
                unit
            };

            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run_unit(unit).await });
        }
    }

    /// 上传单元：执行上传，结算，补位
    ///
    /// 上传在独立任务中执行，错误和 panic 都在这里收口，不会越过单元边界
    async fn run_unit(self: Arc<Self>, unit: DispatchedUnit) {
        let worker = tokio::spawn({
            let inner = Arc::clone(&self);
            let unit = unit.clone();
            async move { inner.upload_one(&unit).await }
        });

        let outcome = match worker.await {
            Ok(result) => result,
            Err(e) => Err(UploadError::Aborted(join_error_message(e))),
        };

        self.settle(&unit, outcome);
        self.refill();
    }

    async fn upload_one(&self, unit: &DispatchedUnit) -> Result<(), UploadError> {
        let file = &unit.file;

        let destination = self.resolver.resolve(&file.name, &file.content_type).await?;

        let throttler = ProgressThrottler::new(self.options.progress_throttle);
        let on_progress =
            |sent: u64, total: u64| self.record_progress(unit, &throttler, sent, total);

        self.transporter
            .transfer(file, destination, &on_progress)
            .await?;

        Ok(())
    }

    /// 记录进度；批次已被替换时忽略迟到的进度
    fn record_progress(
        &self,
        unit: &DispatchedUnit,
        throttler: &ProgressThrottler,
        bytes_sent: u64,
        bytes_total: u64,
    ) {
        {
            let state = self.state.lock();
            if state.batch.id != unit.batch_id {
                return;
            }
            self.progress
                .record_progress(&unit.file.name, bytes_sent, bytes_total);
        }

        let progress = percentage(bytes_sent, bytes_total);
        if throttler.should_emit(progress) {
            self.publish(UploadEvent::Progress {
                batch_id: unit.batch_id,
                file_name: unit.file.name.clone(),
                bytes_sent,
                bytes_total,
                progress,
            });
        }
    }

    /// 结算：释放槽位，标记终态，更新批次结果
    ///
    /// 条目终态、批次结果和对应事件在同一临界区内完成，
    /// 快照中条目全部结束时批次结果一定已结束
    fn settle(&self, unit: &DispatchedUnit, outcome: Result<(), UploadError>) {
        let event = match &outcome {
            Ok(()) => {
                info!(
                    "上传完成: batch_id={}, file={}",
                    unit.batch_id, unit.file.name
                );
                UploadEvent::Completed {
                    batch_id: unit.batch_id,
                    file_name: unit.file.name.clone(),
                }
            }
            Err(e) => {
                error!(
                    "❌ 上传失败: batch_id={}, file={}, stage={}, 错误: {}",
                    unit.batch_id,
                    unit.file.name,
                    e.stage(),
                    e
                );
                UploadEvent::Failed {
                    batch_id: unit.batch_id,
                    file_name: unit.file.name.clone(),
                    stage: e.stage().to_string(),
                    error: e.to_string(),
                }
            }
        };

        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.batch.id == unit.batch_id {
            if let Some(entry) = state.batch.entries.get_mut(unit.index) {
                match &outcome {
                    Ok(()) => entry.mark_completed(),
                    Err(e) => entry.mark_failed(e.to_string()),
                };
            }
        }

        let finished = update_report(&unit.report_tx, |r| {
            if outcome.is_ok() {
                r.completed += 1;
            } else {
                r.failed += 1;
            }
        });

        self.publish(event);
        if let Some(report) = finished {
            self.publish_finished(report);
        }
    }

    fn publish_finished(&self, report: BatchReport) {
        info!(
            "批次结束: batch_id={}, 完成={}, 失败={}, 丢弃={}",
            report.batch_id, report.completed, report.failed, report.discarded
        );
        self.publish(UploadEvent::BatchFinished {
            batch_id: report.batch_id,
            completed: report.completed,
            failed: report.failed,
            discarded: report.discarded,
        });
    }

    fn publish(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }
}

/// 更新批次结果，本次更新使批次结束时返回最终结果
fn update_report(
    report_tx: &watch::Sender<BatchReport>,
    update: impl FnOnce(&mut BatchReport),
) -> Option<BatchReport> {
    let mut finished = None;
    report_tx.send_modify(|report| {
        let was_finished = report.is_finished();
        update(report);
        if !was_finished && report.is_finished() {
            finished = Some(report.clone());
        }
    });
    finished
}

/// 上传任务异常结束的原因（panic 信息或取消）
fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let panic = e.into_panic();
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
