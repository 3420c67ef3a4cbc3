//! Core: 任务调度、单任务执行、事件分发和断点存储

pub mod actor_manager;
pub mod breakpoint;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod http;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use breakpoint::{BreakpointRecord, BreakpointStore, JsonBreakpointStore, MemoryBreakpointStore};
pub use dispatcher::{EventDispatcher, ListenerTable, ObserverId, TaskFilter, TaskListener};
pub use engine::DownloadEngine;
pub use error::{DownloadError, DownloadResult};
pub use http::{AwcTransport, ByteRange, RangeResponse, RangeTransport};
pub use task::{EventKind, TaskEvent, TaskHandle, TaskId, TaskStatus};
