//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `actor`: `DownloadTaskActor` 的定义
//! - `state`: 任务状态 `TaskStatus` 与迁移规则
//! - `model`: 任务标识、快照和事件
//! - `messages`: Actor 之间传递的消息
//! - `handlers`: 消息处理器
//! - `executor`: 一次运行的完整流程
//! - `probe`: 远程资源探测
//! - `segments`: 分段计划与进度板
//! - `download`: 分段 worker
//! - `retry`: 重试逻辑
//! - `util`: 定位写入、测速和控制信号

pub mod actor;
pub mod state;
pub mod model;
pub mod messages;
pub mod handlers;
pub mod executor;
pub mod probe;
pub mod segments;
pub mod download;
pub mod retry;
pub mod util;

pub use actor::DownloadTaskActor;
pub use messages::{CancelTask, PauseTask, ResumeTask, StartTask};
pub use model::{EventKind, TaskEvent, TaskHandle, TaskId, TaskIdentity};
pub use probe::RemoteInfo;
pub use retry::{RetryContext, RetryStrategy};
pub use state::TaskStatus;
