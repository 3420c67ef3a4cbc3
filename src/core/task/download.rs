//! 分段 worker：下载 `[start, end)` 中尚未完成的部分并按偏移写入目标文件

use futures::StreamExt;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::retry::{RetryContext, RetryStrategy};
use super::segments::{ProgressBoard, SegmentState};
use super::util::{self, interrupted, ControlSignal, TaskControl};
use crate::core::error::DownloadError;
use crate::core::http::{ByteRange, SharedTransport};

/// 一次运行内所有 worker 共享的上下文
pub(crate) struct WorkerContext {
    pub transport: SharedTransport,
    pub url: String,
    pub path: PathBuf,
    pub file: Rc<File>,
    pub board: Rc<ProgressBoard>,
    pub supports_range: bool,
    pub read_timeout: Duration,
    pub retry: RetryStrategy,
    pub control: TaskControl,
    /// 每写入一块数据发送一次分段序号
    pub ticks: mpsc::UnboundedSender<usize>,
}

/// worker 退出的原因
#[derive(Debug)]
pub(crate) enum WorkerExit {
    Interrupted(ControlSignal),
    Failed(DownloadError),
}

pub(crate) async fn run_segment(ctx: &WorkerContext, index: usize) -> Result<(), WorkerExit> {
    let slot = ctx.board.slot(index);
    let mut retry = RetryContext::new(ctx.retry.clone());
    let mut signals = ctx.control.subscribe();
    slot.set_state(SegmentState::Active);

    loop {
        let signal = ctx.control.signal();
        if signal != ControlSignal::Run {
            slot.set_state(SegmentState::Pending);
            return Err(WorkerExit::Interrupted(signal));
        }

        let err = match fetch_segment(ctx, index).await {
            Ok(()) => {
                slot.set_state(SegmentState::Done);
                let _ = ctx.ticks.send(index);
                log::debug!("分段 {} 完成", index);
                return Ok(());
            }
            Err(WorkerExit::Interrupted(signal)) => {
                slot.set_state(SegmentState::Pending);
                return Err(WorkerExit::Interrupted(signal));
            }
            Err(WorkerExit::Failed(err)) => err,
        };

        // 存储错误和范围被忽略原样交给执行器处理
        if !err.is_segment_retryable() {
            slot.set_state(SegmentState::Failed);
            return Err(WorkerExit::Failed(err));
        }
        if !retry.strategy.has_budget(retry.failures()) {
            slot.set_state(SegmentState::Failed);
            return Err(WorkerExit::Failed(DownloadError::SegmentFailed {
                index,
                retries: retry.failures(),
                source: Box::new(err),
            }));
        }

        log::warn!(
            "分段 {} 出错，从偏移 {} 重试 (第 {}/{} 次失败): {}",
            index,
            slot.resume_offset(),
            retry.failures(),
            retry.strategy.max_retries,
            err
        );
        let delay = retry.increment_retry(err);
        slot.record_retry();
        let _ = ctx.ticks.send(index);
        tokio::select! {
            biased;
            signal = interrupted(&mut signals) => {
                slot.set_state(SegmentState::Pending);
                return Err(WorkerExit::Interrupted(signal));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// 发起一次请求并把响应体写完，失败时已写入的字节保留在计数器中
async fn fetch_segment(ctx: &WorkerContext, index: usize) -> Result<(), WorkerExit> {
    let slot = ctx.board.slot(index);
    if !ctx.supports_range && slot.bytes_completed() > 0 {
        slot.reset_progress();
    }
    if slot.remaining() == Some(0) {
        return Ok(());
    }

    let mut offset = slot.resume_offset();
    let range = ctx
        .supports_range
        .then(|| ByteRange::new(offset, slot.end));
    let mut signals = ctx.control.subscribe();

    let response = tokio::select! {
        biased;
        signal = interrupted(&mut signals) => return Err(WorkerExit::Interrupted(signal)),
        response = ctx.transport.get(&ctx.url, range) => response.map_err(WorkerExit::Failed)?,
    };

    let expected = if range.is_some() { 206 } else { 200 };
    if response.status != expected {
        let err = match response.status {
            200 => DownloadError::RangeUnsupported,
            status => DownloadError::Status(status),
        };
        return Err(WorkerExit::Failed(err));
    }

    let mut body = response.body;
    loop {
        let next = tokio::select! {
            biased;
            signal = interrupted(&mut signals) => return Err(WorkerExit::Interrupted(signal)),
            next = tokio::time::timeout(ctx.read_timeout, body.next()) => next,
        };
        let chunk = match next {
            Err(_) => return Err(WorkerExit::Failed(DownloadError::Timeout)),
            Ok(None) => break,
            Ok(Some(chunk)) => chunk.map_err(WorkerExit::Failed)?,
        };

        // 服务器多给的字节丢掉，保证不越过分段边界
        let writable = match slot.end {
            Some(end) => chunk.len().min(end.saturating_sub(offset) as usize),
            None => chunk.len(),
        };
        if writable == 0 {
            break;
        }
        util::write_all_at(&ctx.file, &chunk[..writable], offset)
            .map_err(|e| WorkerExit::Failed(DownloadError::storage(&ctx.path, e)))?;
        offset += writable as u64;
        slot.add_bytes(writable as u64);
        let _ = ctx.ticks.send(index);

        if slot.end == Some(offset) {
            break;
        }
    }

    match slot.end {
        Some(end) if offset < end => Err(WorkerExit::Failed(DownloadError::segment_io(
            index,
            format!("连接提前关闭，收到 {} / {} 字节", offset - slot.start, end - slot.start),
        ))),
        _ => Ok(()),
    }
}
