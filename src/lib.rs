//! MultiDown：可断点续传的多线程分段下载引擎
//!
//! 引擎入口是 [`DownloadEngine`]，需要在 actix `System` 中使用：
//! 提交 (目标路径, URL) 得到 [`TaskHandle`]，通过 [`TaskListener`] 接收状态和进度事件。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use crate::config::{Config, DownloadOptions};
pub use crate::core::{
    DownloadEngine, DownloadError, DownloadResult, ListenerTable, ObserverId, TaskEvent, TaskFilter, TaskHandle,
    TaskId, TaskListener, TaskStatus,
};
