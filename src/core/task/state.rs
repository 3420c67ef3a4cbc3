use serde::{Deserialize, Serialize};
use std::fmt;

/// 下载任务状态
///
/// 合法的迁移路径：
/// `Pending → Probing → Downloading → {Succeeded | Failed | Paused}`，
/// `Probing → Failed`，`Paused → Probing`（恢复），任意非终态 → `Cancelled`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Probing,
    Downloading,
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Probing)
            | (Probing, Downloading)
            | (Probing, Failed)
            | (Downloading, Succeeded)
            | (Downloading, Failed)
            | (Downloading, Paused)
            | (Paused, Probing) => true,
            (current, Cancelled) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "等待中",
            TaskStatus::Probing => "探测中",
            TaskStatus::Downloading => "下载中",
            TaskStatus::Paused => "已暂停",
            TaskStatus::Succeeded => "已完成",
            TaskStatus::Failed => "失败",
            TaskStatus::Cancelled => "已取消",
        };
        f.write_str(name)
    }
}
