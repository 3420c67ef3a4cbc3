use actix::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::state::TaskStatus;
use crate::core::error::DownloadError;

/// 任务标识，由 (目标路径, URL) 派生，进程重启后保持不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn derive(destination: &Path, url: &str) -> Self {
        let key = format!("{}\n{}", destination.to_string_lossy(), url);
        TaskId(Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// 任务身份：两个身份相同的提交会合并到同一个任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    pub id: TaskId,
    pub destination: PathBuf,
    pub url: String,
}

impl TaskIdentity {
    pub fn new(destination: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        let destination = destination.into();
        let url = url.into();
        Self {
            id: TaskId::derive(&destination, &url),
            destination,
            url,
        }
    }
}

/// 任务快照，调度器和调用方拿到的都是副本
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    /// 提交序号，单调递增
    pub seq: u64,
    pub destination: PathBuf,
    pub url: String,
    pub state: TaskStatus,
    pub bytes_completed: u64,
    /// `None` 表示服务器没有告知大小
    pub total_size: Option<u64>,
    /// 字节/秒
    pub speed: u64,
    pub retry_count: u32,
    pub error: Option<DownloadError>,
}

impl TaskHandle {
    pub fn new(identity: &TaskIdentity, seq: u64) -> Self {
        Self {
            id: identity.id,
            seq,
            destination: identity.destination.clone(),
            url: identity.url.clone(),
            state: TaskStatus::Pending,
            bytes_completed: 0,
            total_size: None,
            speed: 0,
            retry_count: 0,
            error: None,
        }
    }

    pub fn apply(&mut self, event: &TaskEvent) {
        self.state = event.state;
        self.bytes_completed = event.bytes_completed;
        self.total_size = event.total_size;
        self.speed = event.speed;
        self.retry_count = event.retry_count;
        if event.error.is_some() {
            self.error = event.error.clone();
        }
    }

    /// 完成百分比，大小未知时返回 `None`
    pub fn progress(&self) -> Option<f64> {
        match self.total_size {
            Some(0) => Some(100.0),
            Some(total) => Some(self.bytes_completed as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StateChanged,
    Progress,
}

/// 任务生命周期事件
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub id: TaskId,
    pub kind: EventKind,
    pub state: TaskStatus,
    pub bytes_completed: u64,
    pub total_size: Option<u64>,
    pub speed: u64,
    pub retry_count: u32,
    pub error: Option<DownloadError>,
}
impl Message for TaskEvent { type Result = (); }

impl TaskEvent {
    pub fn state_changed(id: TaskId, state: TaskStatus) -> Self {
        Self {
            id,
            kind: EventKind::StateChanged,
            state,
            bytes_completed: 0,
            total_size: None,
            speed: 0,
            retry_count: 0,
            error: None,
        }
    }

    pub fn with_progress(mut self, bytes_completed: u64, total_size: Option<u64>) -> Self {
        self.bytes_completed = bytes_completed;
        self.total_size = total_size;
        self
    }

    pub fn with_error(mut self, error: DownloadError) -> Self {
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_is_stable() {
        let a = TaskId::derive(Path::new("/data/a.bin"), "https://example.com/a.bin");
        let b = TaskId::derive(Path::new("/data/a.bin"), "https://example.com/a.bin");
        let c = TaskId::derive(Path::new("/data/b.bin"), "https://example.com/a.bin");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_handle_apply_keeps_last_error() {
        let identity = TaskIdentity::new("/tmp/x", "https://example.com/x");
        let mut handle = TaskHandle::new(&identity, 7);
        let failed = TaskEvent::state_changed(identity.id, TaskStatus::Failed)
            .with_progress(10, Some(100))
            .with_error(DownloadError::Timeout);
        handle.apply(&failed);
        assert_eq!(handle.state, TaskStatus::Failed);
        assert_eq!(handle.progress(), Some(10.0));

        let progress = TaskEvent::state_changed(identity.id, TaskStatus::Probing);
        handle.apply(&progress);
        assert_eq!(handle.error, Some(DownloadError::Timeout));
        assert_eq!(handle.seq, 7);
    }
}
