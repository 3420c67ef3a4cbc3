//! 断点记录
//!
//! 每个任务一条记录，保存分段计划与各段已完成的字节数。记录在计划建立、分段完成、
//! 下载过程中定期、以及暂停/取消/失败时写入；任务成功后删除。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::core::error::DownloadError;
use crate::core::task::model::{TaskId, TaskIdentity};
use crate::core::task::probe::RemoteInfo;
use crate::core::task::segments::{is_partition, Segment, SegmentState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub start: u64,
    pub end: Option<u64>,
    pub bytes_completed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub task_id: TaskId,
    pub url: String,
    pub destination: PathBuf,
    pub total_size: Option<u64>,
    pub supports_range: bool,
    pub resource_token: Option<String>,
    pub segments: Vec<SegmentRecord>,
    pub updated_at: DateTime<Utc>,
}

impl BreakpointRecord {
    pub fn capture(identity: &TaskIdentity, info: &RemoteInfo, segments: &[Segment]) -> Self {
        Self {
            task_id: identity.id,
            url: identity.url.clone(),
            destination: identity.destination.clone(),
            total_size: info.total_size,
            supports_range: info.supports_range,
            resource_token: info.resource_token.clone(),
            segments: segments
                .iter()
                .map(|s| SegmentRecord {
                    start: s.start,
                    end: s.end,
                    bytes_completed: s.bytes_completed,
                })
                .collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn bytes_completed(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes_completed).sum()
    }

    /// 记录是否还能用于续传，不能时返回原因
    pub fn mismatch(&self, identity: &TaskIdentity, info: &RemoteInfo) -> Option<String> {
        if self.task_id != identity.id || self.url != identity.url || self.destination != identity.destination {
            return Some("任务身份不一致".to_string());
        }
        if self.total_size != info.total_size {
            return Some(format!("文件大小变化: {:?} -> {:?}", self.total_size, info.total_size));
        }
        if self.resource_token != info.resource_token {
            return Some(format!(
                "资源标识变化: {:?} -> {:?}",
                self.resource_token, info.resource_token
            ));
        }
        if self.supports_range != info.supports_range {
            return Some("服务器范围请求支持发生变化".to_string());
        }
        if !is_partition(&self.restore_segments(), self.total_size) {
            return Some("分段记录不完整".to_string());
        }
        None
    }

    pub fn restore_segments(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let mut segment = Segment::new(index, record.start, record.end);
                segment.bytes_completed = record.bytes_completed;
                if segment.len().is_some_and(|len| record.bytes_completed >= len) {
                    segment.state = SegmentState::Done;
                }
                segment
            })
            .collect()
    }
}

/// 断点记录的持久化接口
pub trait BreakpointStore {
    fn load(&self, id: TaskId) -> Result<Option<BreakpointRecord>, DownloadError>;
    fn save(&self, record: &BreakpointRecord) -> Result<(), DownloadError>;
    fn remove(&self, id: TaskId) -> Result<(), DownloadError>;
}

pub type SharedStore = Rc<dyn BreakpointStore>;

/// 每个任务一个 `<task-id>.json` 文件
pub struct JsonBreakpointStore {
    dir: PathBuf,
    locks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl JsonBreakpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| DownloadError::storage(&dir, e))?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock_for(&self, id: TaskId) -> Result<Arc<Mutex<()>>, DownloadError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| DownloadError::Breakpoint("锁已损坏".to_string()))?;
        Ok(locks.entry(id).or_default().clone())
    }

    fn with_lock<T>(&self, id: TaskId, f: impl FnOnce() -> Result<T, DownloadError>) -> Result<T, DownloadError> {
        let lock = self.lock_for(id)?;
        let _guard = lock
            .lock()
            .map_err(|_| DownloadError::Breakpoint("锁已损坏".to_string()))?;
        f()
    }
}

impl BreakpointStore for JsonBreakpointStore {
    fn load(&self, id: TaskId) -> Result<Option<BreakpointRecord>, DownloadError> {
        let path = self.path(id);
        self.with_lock(id, || {
            let content = match fs::read(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(DownloadError::storage(&path, e)),
            };
            match serde_json::from_slice(&content) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    log::warn!("断点记录损坏，忽略 {}: {}", path.display(), e);
                    Ok(None)
                }
            }
        })
    }

    fn save(&self, record: &BreakpointRecord) -> Result<(), DownloadError> {
        let path = self.path(record.task_id);
        self.with_lock(record.task_id, || {
            let content = serde_json::to_vec_pretty(record)
                .map_err(|e| DownloadError::Breakpoint(e.to_string()))?;
            // 先写临时文件再重命名，避免留下半截记录
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, content).map_err(|e| DownloadError::storage(&tmp, e))?;
            fs::rename(&tmp, &path).map_err(|e| DownloadError::storage(&path, e))
        })
    }

    fn remove(&self, id: TaskId) -> Result<(), DownloadError> {
        let path = self.path(id);
        self.with_lock(id, || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::storage(&path, e)),
        })?;
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&id);
        }
        Ok(())
    }
}

/// 不落盘的断点存储，只在当前进程内有效
#[derive(Default)]
pub struct MemoryBreakpointStore {
    records: Mutex<HashMap<TaskId, BreakpointRecord>>,
}

impl MemoryBreakpointStore {
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BreakpointStore for MemoryBreakpointStore {
    fn load(&self, id: TaskId) -> Result<Option<BreakpointRecord>, DownloadError> {
        let records = self
            .records
            .lock()
            .map_err(|_| DownloadError::Breakpoint("锁已损坏".to_string()))?;
        Ok(records.get(&id).cloned())
    }

    fn save(&self, record: &BreakpointRecord) -> Result<(), DownloadError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| DownloadError::Breakpoint("锁已损坏".to_string()))?;
        records.insert(record.task_id, record.clone());
        Ok(())
    }

    fn remove(&self, id: TaskId) -> Result<(), DownloadError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| DownloadError::Breakpoint("锁已损坏".to_string()))?;
        records.remove(&id);
        Ok(())
    }
}
