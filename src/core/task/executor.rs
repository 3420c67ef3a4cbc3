//! 单个任务的一次运行：探测 → 建立/恢复分段计划 → 分段下载 → 收尾
//!
//! `TaskRun` 是进度的唯一写者：worker 只更新各自分段的原子计数，并通过 channel 通知，
//! 由这里求和、节流地发出进度事件和写断点记录。

use actix::prelude::*;
use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::fs::{self, File, OpenOptions};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

use super::download::{run_segment, WorkerContext, WorkerExit};
use super::model::{EventKind, TaskEvent, TaskIdentity};
use super::probe::{self, RemoteInfo};
use super::retry::RetryContext;
use super::segments::{plan_segments, ProgressBoard, Segment};
use super::state::TaskStatus;
use super::util::{interrupted, ControlSignal, SpeedMeter, TaskControl};
use crate::config::DownloadOptions;
use crate::core::breakpoint::{BreakpointRecord, SharedStore};
use crate::core::dispatcher::EventDispatcher;
use crate::core::error::DownloadError;
use crate::core::http::SharedTransport;

/// 事件出口：调度器用于记账，分发器用于通知观察者
#[derive(Clone)]
pub struct EventSink {
    pub manager: Option<Recipient<TaskEvent>>,
    pub dispatcher: Addr<EventDispatcher>,
}

impl EventSink {
    pub fn emit(&self, event: TaskEvent) {
        if let Some(manager) = &self.manager {
            manager.do_send(event.clone());
        }
        self.dispatcher.do_send(event);
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(DownloadError),
    Paused,
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            RunOutcome::Succeeded => TaskStatus::Succeeded,
            RunOutcome::Failed(_) => TaskStatus::Failed,
            RunOutcome::Paused => TaskStatus::Paused,
            RunOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

pub struct TaskRun {
    pub(crate) identity: TaskIdentity,
    pub(crate) options: DownloadOptions,
    pub(crate) transport: SharedTransport,
    pub(crate) store: SharedStore,
    pub(crate) control: TaskControl,
    pub(crate) events: EventSink,
    pub(crate) status: TaskStatus,
    pub(crate) info: Option<RemoteInfo>,
    bytes_completed: u64,
    retry_count: u32,
    speed: u64,
}

struct Prepared {
    segments: Vec<Segment>,
    file: File,
}

impl TaskRun {
    pub fn new(
        identity: TaskIdentity,
        options: DownloadOptions,
        transport: SharedTransport,
        store: SharedStore,
        control: TaskControl,
        events: EventSink,
        status: TaskStatus,
    ) -> Self {
        Self {
            identity,
            options,
            transport,
            store,
            control,
            events,
            status,
            info: None,
            bytes_completed: 0,
            retry_count: 0,
            speed: 0,
        }
    }

    fn total_size(&self) -> Option<u64> {
        self.info.as_ref().and_then(|info| info.total_size)
    }

    fn event(&self, kind: EventKind) -> TaskEvent {
        TaskEvent {
            id: self.identity.id,
            kind,
            state: self.status,
            bytes_completed: self.bytes_completed,
            total_size: self.total_size(),
            speed: self.speed,
            retry_count: self.retry_count,
            error: None,
        }
    }

    fn transition(&mut self, next: TaskStatus, error: Option<DownloadError>) -> bool {
        if !self.status.can_transition_to(next) {
            log::error!(
                "任务 {} 非法状态迁移 {:?} -> {:?}，已忽略",
                self.identity.id,
                self.status,
                next
            );
            return false;
        }
        log::info!("任务 {} 状态: {} -> {}", self.identity.id, self.status, next);
        self.status = next;
        let mut event = self.event(EventKind::StateChanged);
        event.error = error;
        self.events.emit(event);
        true
    }

    /// 运行到暂停或终态，同时返回最后的进度快照
    pub async fn run(mut self) -> (RunOutcome, TaskEvent) {
        let outcome = self.execute().await;
        let last_event = self.event(EventKind::StateChanged);
        (outcome, last_event)
    }

    async fn execute(&mut self) -> RunOutcome {
        self.transition(TaskStatus::Probing, None);

        let info = match self.probe_with_retry().await {
            Ok(info) => info,
            Err(RunOutcome::Failed(err)) => return self.fail(err, None),
            Err(_) => {
                // 探测阶段被取消时还没有动过文件
                self.transition(TaskStatus::Cancelled, None);
                return RunOutcome::Cancelled;
            }
        };
        self.info = Some(info.clone());

        let prepared = match self.prepare(&info) {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(err, None),
        };
        let mut board = Rc::new(ProgressBoard::new(prepared.segments));
        self.bytes_completed = board.bytes_completed();
        if let Err(err) = self.persist(&board) {
            return self.fail(err, None);
        }

        self.transition(TaskStatus::Downloading, None);
        let file = Rc::new(prepared.file);
        let mut first_error = self.download(&board, file.clone()).await;
        let range_ignored = first_error == Some(DownloadError::RangeUnsupported);
        if range_ignored && self.control.signal() == ControlSignal::Abort {
            first_error = match self.fall_back_to_single(&file) {
                Ok(single) => {
                    board = single;
                    self.download(&board, file.clone()).await
                }
                Err(err) => Some(err),
            };
        }
        self.finish(&board, &file, first_error)
    }

    /// 分段请求被当成整文件返回：清空目标文件，改成一个不带 `Range` 的分段从头下载
    fn fall_back_to_single(&mut self, file: &File) -> Result<Rc<ProgressBoard>, DownloadError> {
        log::warn!(
            "任务 {} 的分段请求返回了整个文件，改为单段下载",
            self.identity.id
        );
        let total = self.total_size();
        if let Some(info) = self.info.as_mut() {
            info.supports_range = false;
        }

        let destination = &self.identity.destination;
        file.set_len(0).map_err(|e| DownloadError::storage(destination, e))?;
        if let Some(total) = total {
            file.set_len(total).map_err(|e| DownloadError::storage(destination, e))?;
        }

        let segments = plan_segments(total, false, self.options.thread_count, self.options.min_segment_size);
        let board = Rc::new(ProgressBoard::new(segments));
        self.bytes_completed = 0;
        self.persist(&board)?;
        self.control.reset();
        Ok(board)
    }

    /// 探测失败按重试策略重来；暂停要等进入下载状态后才生效
    async fn probe_with_retry(&mut self) -> Result<RemoteInfo, RunOutcome> {
        let mut retry = RetryContext::new(self.options.retry.clone());
        loop {
            if self.control.signal() == ControlSignal::Cancel {
                return Err(RunOutcome::Cancelled);
            }
            let err = match probe::probe(self.transport.as_ref(), &self.identity.url).await {
                Ok(info) => return Ok(info),
                Err(err) => err,
            };
            if !retry.should_retry(&err) {
                let err = match err {
                    DownloadError::InvalidUrl(_) | DownloadError::UnsupportedScheme(_) => err,
                    other => DownloadError::Probe {
                        url: self.identity.url.clone(),
                        reason: other.to_string(),
                    },
                };
                return Err(RunOutcome::Failed(err));
            }

            let delay = retry.increment_retry(err.clone());
            self.retry_count += 1;
            log::warn!(
                "探测 {} 失败，{:?} 后重试 ({}/{}): {}",
                self.identity.url,
                delay,
                retry.retry_count,
                retry.strategy.max_retries,
                err
            );
            let mut signals = self.control.subscribe();
            tokio::select! {
                biased;
                ControlSignal::Cancel = interrupted(&mut signals) => return Err(RunOutcome::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 决定续传还是重新开始，并打开目标文件
    fn prepare(&self, info: &RemoteInfo) -> Result<Prepared, DownloadError> {
        let id = self.identity.id;
        let destination = &self.identity.destination;

        let record = self.store.load(id).unwrap_or_else(|e| {
            log::warn!("读取断点记录失败 {}: {}", id, e);
            None
        });

        if let Some(record) = record {
            let file_len = fs::metadata(destination).ok().map(|m| m.len());
            let reason = match (record.mismatch(&self.identity, info), file_len) {
                (Some(reason), _) => Some(reason),
                (None, None) => Some("目标文件已不存在".to_string()),
                // 不支持范围请求只能从头再来，旧文件必须截断
                (None, Some(_)) if !record.supports_range => Some("服务器不支持范围请求".to_string()),
                (None, Some(len)) => match info.total_size {
                    Some(total) if len != total => Some(format!("目标文件长度 {} 与记录不符", len)),
                    None if len < record.bytes_completed() => Some("目标文件比断点记录短".to_string()),
                    _ => None,
                },
            };

            match reason {
                None => {
                    let file = OpenOptions::new()
                        .write(true)
                        .open(destination)
                        .map_err(|e| DownloadError::storage(destination, e))?;
                    log::info!(
                        "任务 {} 从断点恢复，已完成 {} 字节",
                        id,
                        record.bytes_completed()
                    );
                    return Ok(Prepared {
                        segments: record.restore_segments(),
                        file,
                    });
                }
                Some(reason) => {
                    log::warn!(
                        "任务 {} 丢弃断点记录并重新下载: {} ({})",
                        id,
                        DownloadError::ResourceChanged,
                        reason
                    );
                    self.store.remove(id)?;
                }
            }
        }

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| DownloadError::storage(parent, e))?;
            }
        }
        let file = File::create(destination).map_err(|e| DownloadError::storage(destination, e))?;
        if let Some(total) = info.total_size {
            // 预分配，稀疏文件不会真的占满磁盘
            file.set_len(total).map_err(|e| DownloadError::storage(destination, e))?;
        }

        Ok(Prepared {
            segments: plan_segments(
                info.total_size,
                info.supports_range,
                self.options.thread_count,
                self.options.min_segment_size,
            ),
            file,
        })
    }

    fn persist(&self, board: &ProgressBoard) -> Result<(), DownloadError> {
        let Some(info) = &self.info else {
            return Ok(());
        };
        let record = BreakpointRecord::capture(&self.identity, info, &board.snapshot());
        self.store.save(&record)
    }

    async fn download(&mut self, board: &Rc<ProgressBoard>, file: Rc<File>) -> Option<DownloadError> {
        let Some(info) = self.info.clone() else {
            return None;
        };
        let (ticks, mut tick_rx) = mpsc::unbounded_channel();
        let ctx = Rc::new(WorkerContext {
            transport: self.transport.clone(),
            url: self.identity.url.clone(),
            path: self.identity.destination.clone(),
            file,
            board: board.clone(),
            supports_range: info.supports_range,
            read_timeout: self.options.read_timeout,
            retry: self.options.retry.clone(),
            control: self.control.clone(),
            ticks,
        });

        let permits = Rc::new(Semaphore::new(self.options.thread_count.max(1)));
        let mut workers: FuturesUnordered<LocalBoxFuture<'static, (usize, Result<(), WorkerExit>)>> =
            board
                .pending_indices()
                .into_iter()
                .map(|index| {
                    let ctx = ctx.clone();
                    let permits = permits.clone();
                    let fut: LocalBoxFuture<'static, _> = Box::pin(async move {
                        let _permit = permits.acquire().await;
                        (index, run_segment(&ctx, index).await)
                    });
                    fut
                })
                .collect();
        drop(ctx);

        log::debug!(
            "任务 {} 启动 {} 个分段，线程上限 {}",
            self.identity.id,
            workers.len(),
            self.options.thread_count
        );

        let mut meter = SpeedMeter::new(Duration::from_secs(1), board.bytes_completed());
        let mut last_progress: Option<Instant> = None;
        let mut last_flush = Instant::now();
        let mut first_error = None;

        loop {
            tokio::select! {
                Some(_) = tick_rx.recv() => {
                    self.on_tick(board, &mut meter, &mut last_progress, &mut last_flush);
                }
                next = workers.next() => match next {
                    None => break,
                    Some((_, Ok(()))) => {
                        // 分段完成时立即落盘
                        if let Err(err) = self.persist(board) {
                            log::warn!("写断点记录失败: {}", err);
                        }
                        last_flush = Instant::now();
                    }
                    Some((_, Err(WorkerExit::Interrupted(_)))) => {}
                    Some((index, Err(WorkerExit::Failed(err)))) => {
                        log::error!("任务 {} 分段 {} 失败: {}", self.identity.id, index, err);
                        if first_error.is_none() {
                            first_error = Some(err);
                            self.control.abort();
                        }
                    }
                },
            }
        }

        self.bytes_completed = board.bytes_completed();
        self.retry_count = self.retry_count.max(board.retry_count());
        first_error
    }

    fn on_tick(
        &mut self,
        board: &ProgressBoard,
        meter: &mut SpeedMeter,
        last_progress: &mut Option<Instant>,
        last_flush: &mut Instant,
    ) {
        self.bytes_completed = board.bytes_completed();
        self.retry_count = self.retry_count.max(board.retry_count());
        self.speed = meter.sample(self.bytes_completed);

        let due = last_progress.map_or(true, |at| at.elapsed() >= self.options.progress_interval);
        if due {
            self.events.emit(self.event(EventKind::Progress));
            *last_progress = Some(Instant::now());
        }
        if last_flush.elapsed() >= self.options.flush_interval {
            if let Err(err) = self.persist(board) {
                log::warn!("写断点记录失败: {}", err);
            }
            *last_flush = Instant::now();
        }
    }

    fn finish(&mut self, board: &ProgressBoard, file: &File, first_error: Option<DownloadError>) -> RunOutcome {
        self.speed = 0;
        let bytes = board.bytes_completed();
        self.bytes_completed = bytes;

        if let Some(err) = first_error {
            return self.fail(err, Some(board));
        }

        let size_ok = self.total_size().map_or(true, |total| total == bytes);
        if board.all_done() && size_ok {
            if let Err(e) = file.sync_all() {
                let err = DownloadError::storage(&self.identity.destination, e);
                return self.fail(err, Some(board));
            }
            if let Some(info) = self.info.as_mut() {
                info.total_size.get_or_insert(bytes);
            }
            if let Err(err) = self.store.remove(self.identity.id) {
                log::warn!("删除断点记录失败 {}: {}", self.identity.id, err);
            }
            self.transition(TaskStatus::Succeeded, None);
            return RunOutcome::Succeeded;
        }

        // 先刷盘再写断点，保证记录不会比磁盘上的数据多
        if let Err(e) = file.sync_data() {
            log::warn!("刷新文件失败 {}: {}", self.identity.destination.display(), e);
        }
        match self.control.signal() {
            ControlSignal::Pause => {
                if let Err(err) = self.persist(board) {
                    return self.fail(err, None);
                }
                self.transition(TaskStatus::Paused, None);
                RunOutcome::Paused
            }
            ControlSignal::Cancel => {
                if let Err(err) = self.persist(board) {
                    log::warn!("写断点记录失败: {}", err);
                }
                self.transition(TaskStatus::Cancelled, None);
                RunOutcome::Cancelled
            }
            _ => {
                let err = DownloadError::SegmentIo {
                    index: 0,
                    reason: format!(
                        "下载未完成: {} / {:?} 字节",
                        bytes,
                        self.total_size()
                    ),
                };
                self.fail(err, Some(board))
            }
        }
    }

    fn fail(&mut self, err: DownloadError, board: Option<&ProgressBoard>) -> RunOutcome {
        if let Some(board) = board {
            if let Err(e) = self.persist(board) {
                log::warn!("写断点记录失败: {}", e);
            }
        }
        log::error!("任务 {} 失败: {}", self.identity.id, err);
        self.transition(TaskStatus::Failed, Some(err.clone()));
        RunOutcome::Failed(err)
    }
}
