//! 测试替身：内存中的 HTTP 服务器和事件记录器

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::DownloadOptions;
use crate::core::dispatcher::TaskListener;
use crate::core::error::DownloadError;
use crate::core::http::{BodyStream, ByteRange, RangeResponse, RangeTransport};
use crate::core::task::model::TaskEvent;
use crate::core::task::retry::RetryStrategy;

pub(crate) const PROBE_RANGE: ByteRange = ByteRange { start: 0, end: Some(1) };

struct MockState {
    data: Bytes,
    etag: Option<String>,
    last_modified: Option<String>,
    supports_range: bool,
    /// 只对探测请求返回 206，数据请求一律 200 整个文件
    ranges_on_probe_only: bool,
    hide_length: bool,
    chunk_size: usize,
    /// 读到这个绝对偏移后响应体不再产出数据
    stall_at: Option<u64>,
    /// 每个数据响应产出这么多字节后不再产出
    stall_each: Option<u64>,
    /// 读到这个绝对偏移后连接断开，剩余次数
    cut: Option<(u64, u32)>,
    /// 直接返回的状态码，剩余次数
    fault: Option<(u16, u32)>,
    requests: Vec<Option<ByteRange>>,
}

/// 记录所有请求区间的内存服务器
pub(crate) struct MockServer {
    state: Mutex<MockState>,
}

impl MockServer {
    pub fn new(data: Vec<u8>) -> Rc<Self> {
        Rc::new(Self {
            state: Mutex::new(MockState {
                data: Bytes::from(data),
                etag: None,
                last_modified: None,
                supports_range: true,
                ranges_on_probe_only: false,
                hide_length: false,
                chunk_size: 16 * 1024,
                stall_at: None,
                stall_each: None,
                cut: None,
                fault: None,
                requests: Vec::new(),
            }),
        })
    }

    fn update(self: Rc<Self>, f: impl FnOnce(&mut MockState)) -> Rc<Self> {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_etag(self: Rc<Self>, etag: &str) -> Rc<Self> {
        let etag = etag.to_string();
        self.update(|s| s.etag = Some(etag))
    }

    pub fn with_last_modified(self: Rc<Self>, value: &str) -> Rc<Self> {
        let value = value.to_string();
        self.update(|s| s.last_modified = Some(value))
    }

    pub fn without_range(self: Rc<Self>) -> Rc<Self> {
        self.update(|s| s.supports_range = false)
    }

    pub fn ranges_on_probe_only(self: Rc<Self>) -> Rc<Self> {
        self.update(|s| s.ranges_on_probe_only = true)
    }

    pub fn hide_length(self: Rc<Self>) -> Rc<Self> {
        self.update(|s| s.hide_length = true)
    }

    pub fn with_chunk_size(self: Rc<Self>, chunk_size: usize) -> Rc<Self> {
        self.update(|s| s.chunk_size = chunk_size.max(1))
    }

    pub fn stall_at(self: Rc<Self>, offset: u64) -> Rc<Self> {
        self.update(|s| s.stall_at = Some(offset))
    }

    pub fn cut_at(self: Rc<Self>, offset: u64, times: u32) -> Rc<Self> {
        self.update(|s| s.cut = Some((offset, times)))
    }

    pub fn fail_with_status(self: Rc<Self>, status: u16, times: u32) -> Rc<Self> {
        self.update(|s| s.fault = Some((status, times)))
    }

    pub fn stall_each(self: Rc<Self>, bytes: u64) -> Rc<Self> {
        self.update(|s| s.stall_each = Some(bytes))
    }

    pub fn set_stall_each(&self, bytes: Option<u64>) {
        self.state.lock().unwrap().stall_each = bytes;
    }

    pub fn set_stall(&self, offset: Option<u64>) {
        self.state.lock().unwrap().stall_at = offset;
    }

    pub fn clear_cut(&self) {
        self.state.lock().unwrap().cut = None;
    }

    pub fn replace_content(&self, data: Vec<u8>, etag: &str) {
        let mut state = self.state.lock().unwrap();
        state.data = Bytes::from(data);
        state.etag = Some(etag.to_string());
    }

    pub fn requests(&self) -> Vec<Option<ByteRange>> {
        self.state.lock().unwrap().requests.clone()
    }

    /// 去掉探测请求之后的数据请求
    pub fn data_requests(&self) -> Vec<Option<ByteRange>> {
        self.requests()
            .into_iter()
            .filter(|r| *r != Some(PROBE_RANGE))
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

fn empty_body() -> BodyStream {
    stream::empty().boxed_local()
}

#[async_trait(?Send)]
impl RangeTransport for MockServer {
    async fn get(&self, _url: &str, range: Option<ByteRange>) -> Result<RangeResponse, DownloadError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(range);

        if let Some((status, remaining)) = state.fault {
            if remaining > 0 {
                state.fault = Some((status, remaining - 1));
                return Ok(RangeResponse {
                    status,
                    content_length: Some(0),
                    content_range: None,
                    etag: None,
                    last_modified: None,
                    body: empty_body(),
                });
            }
        }

        let len = state.data.len() as u64;
        let total = if state.hide_length { "*".to_string() } else { len.to_string() };
        let (status, start, end, content_range) = match range {
            Some(range) if state.supports_range && (!state.ranges_on_probe_only || range == PROBE_RANGE) => {
                if range.start >= len {
                    return Ok(RangeResponse {
                        status: 416,
                        content_length: Some(0),
                        content_range: Some(format!("bytes */{}", total)),
                        etag: state.etag.clone(),
                        last_modified: state.last_modified.clone(),
                        body: empty_body(),
                    });
                }
                let end = range.end.unwrap_or(len).min(len);
                let content_range = format!("bytes {}-{}/{}", range.start, end - 1, total);
                (206, range.start, end, Some(content_range))
            }
            _ => (200, 0, len, None),
        };

        let mut limit = end;
        let mut tail = empty_body();
        if let Some((at, remaining)) = state.cut {
            if remaining > 0 && at >= start && at < end {
                state.cut = Some((at, remaining - 1));
                limit = at;
                tail = stream::once(async { Err(DownloadError::Network("connection reset".into())) })
                    .boxed_local();
            }
        }
        if limit == end {
            let each = state.stall_each.map(|bytes| start + bytes);
            if let Some(at) = state.stall_at.filter(|at| *at >= start).or(each) {
                if at < end {
                    limit = at;
                    tail = stream::pending().boxed_local();
                }
            }
        }

        let mut chunks = Vec::new();
        let mut offset = start;
        while offset < limit {
            let next = (offset + state.chunk_size as u64).min(limit);
            chunks.push(Ok(state.data.slice(offset as usize..next as usize)));
            offset = next;
        }

        let content_length = if state.hide_length && status == 200 {
            None
        } else {
            Some(end - start)
        };

        Ok(RangeResponse {
            status,
            content_length,
            content_range,
            etag: state.etag.clone(),
            last_modified: state.last_modified.clone(),
            body: stream::iter(chunks).chain(tail).boxed_local(),
        })
    }
}

/// 把收到的事件转发到 channel 的监听器
pub(crate) struct EventRecorder {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventRecorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TaskListener for EventRecorder {
    fn on_state_changed(&self, event: &TaskEvent) {
        let _ = self.tx.send(event.clone());
    }

    fn on_progress(&self, event: &TaskEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// 等待第一个满足条件的事件，超时直接让测试失败
pub(crate) async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<TaskEvent>,
    mut pred: impl FnMut(&TaskEvent) -> bool,
) -> TaskEvent {
    let wait = async {
        while let Some(event) = rx.recv().await {
            assert!(
                event.total_size.map_or(true, |total| event.bytes_completed <= total),
                "已完成字节超过总大小: {:?}",
                event
            );
            if pred(&event) {
                return event;
            }
        }
        panic!("事件通道已关闭");
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("等待事件超时")
}

pub(crate) fn test_options() -> DownloadOptions {
    DownloadOptions {
        parallel_task_count: 2,
        thread_count: 4,
        min_segment_size: 1,
        read_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        user_agent: "multidown-test".to_string(),
        retry: RetryStrategy::immediate(3),
        progress_interval: Duration::ZERO,
        flush_interval: Duration::ZERO,
    }
}

pub(crate) fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
