use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::core::dispatcher::TaskListener;
use crate::core::error::DownloadError;
use crate::core::task::{TaskEvent, TaskId, TaskStatus};

/// 已结束任务的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// 成功任务的字节数
    pub total_bytes: u64,
}

impl Tally {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

/// 终端进度条，作为监听器接收引擎事件
///
/// 回调在分发线程上执行，条目用 `Mutex` 保护。
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Mutex<HashMap<TaskId, ProgressBar>>,
    tally: watch::Sender<Tally>,
}

impl ProgressManager {
    pub fn new() -> Arc<Self> {
        let (tally, _) = watch::channel(Tally::default());
        Arc::new(Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            tally,
        })
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:20!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }

    /// 提交任务前调用，保证第一条事件到达时进度条已经存在
    pub fn track(&self, id: TaskId, label: &str) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        bars.entry(id).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(0));
            bar.set_style(Self::style());
            bar.set_prefix(label.to_string());
            bar.set_message("等待中");
            bar
        });
    }

    fn with_bar(&self, id: TaskId, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(&id) {
                f(bar);
            }
        }
    }

    pub fn tally(&self) -> Tally {
        *self.tally.borrow()
    }

    /// 等到至少 `expected` 个任务结束
    pub async fn wait_finished(&self, expected: usize) -> Tally {
        let mut rx = self.tally.subscribe();
        loop {
            let tally = *rx.borrow_and_update();
            if tally.finished() >= expected {
                return tally;
            }
            if rx.changed().await.is_err() {
                return tally;
            }
        }
    }

    /// 收起未结束的进度条
    pub fn finish(&self) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.values().filter(|bar| !bar.is_finished()) {
                bar.abandon();
            }
        }
    }
}

pub fn format_speed(speed: u64) -> String {
    if speed > 1024 * 1024 {
        format!("{:.2} MB/s", speed as f64 / (1024.0 * 1024.0))
    } else if speed > 1024 {
        format!("{:.2} KB/s", speed as f64 / 1024.0)
    } else {
        format!("{} B/s", speed)
    }
}

/// 剩余时间，速度为 0 或大小未知时显示“未知”
pub fn format_eta(remaining: Option<u64>, speed: u64) -> String {
    let seconds = match remaining {
        Some(remaining) if speed > 0 => remaining / speed,
        _ => return "未知".to_string(),
    };
    if seconds > 3600 {
        format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds > 60 {
        format!("{}m{}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

impl TaskListener for ProgressManager {
    fn on_state_changed(&self, event: &TaskEvent) {
        if event.state.is_terminal() {
            self.tally.send_modify(|tally| match event.state {
                TaskStatus::Succeeded => {
                    tally.succeeded += 1;
                    tally.total_bytes += event.bytes_completed;
                }
                TaskStatus::Failed => tally.failed += 1,
                _ => tally.cancelled += 1,
            });
            return;
        }
        self.with_bar(event.id, |bar| {
            if let Some(total) = event.total_size {
                bar.set_length(total);
            }
            bar.set_position(event.bytes_completed);
            bar.set_message(event.state.to_string());
        });
    }

    fn on_progress(&self, event: &TaskEvent) {
        self.with_bar(event.id, |bar| {
            match event.total_size {
                Some(total) => bar.set_length(total),
                None => bar.set_length(event.bytes_completed),
            }
            bar.set_position(event.bytes_completed);
            let remaining = event.total_size.map(|total| total.saturating_sub(event.bytes_completed));
            let percentage = event
                .total_size
                .filter(|total| *total > 0)
                .map(|total| format!("{}%", event.bytes_completed * 100 / total))
                .unwrap_or_else(|| "--".to_string());
            bar.set_message(format!(
                "{} | {} | ETA:{}",
                percentage,
                format_speed(event.speed),
                format_eta(remaining, event.speed)
            ));
        });
    }

    fn on_success(&self, event: &TaskEvent) {
        self.with_bar(event.id, |bar| {
            bar.set_position(event.bytes_completed);
            bar.finish_with_message("完成");
        });
    }

    fn on_error(&self, event: &TaskEvent, error: &DownloadError) {
        self.with_bar(event.id, |bar| bar.abandon_with_message(format!("失败: {}", error)));
    }

    fn on_cancel(&self, event: &TaskEvent) {
        self.with_bar(event.id, |bar| bar.abandon_with_message("已取消"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_speed_and_eta_format() {
        assert_eq!(format_speed(512), "512 B/s");
        assert_eq!(format_speed(2048), "2.00 KB/s");
        assert_eq!(format_speed(3 * 1024 * 1024), "3.00 MB/s");
        assert_eq!(format_eta(Some(90), 1), "1m30s");
        assert_eq!(format_eta(Some(7300), 1), "2h1m");
        assert_eq!(format_eta(None, 100), "未知");
        assert_eq!(format_eta(Some(100), 0), "未知");
    }

    #[test]
    fn test_tally_counts_terminal_events() {
        let progress = ProgressManager::new();
        let a = TaskId::derive(Path::new("/tmp/a"), "http://x/a");
        let b = TaskId::derive(Path::new("/tmp/b"), "http://x/b");
        progress.track(a, "a");
        progress.track(b, "b");

        let mut done = TaskEvent::state_changed(a, TaskStatus::Succeeded);
        done.bytes_completed = 100;
        progress.on_state_changed(&done);
        progress.on_success(&done);
        let failed = TaskEvent::state_changed(b, TaskStatus::Failed).with_error(DownloadError::Timeout);
        progress.on_state_changed(&failed);

        let tally = tokio_test::block_on(progress.wait_finished(2));
        assert_eq!(tally.succeeded, 1);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.total_bytes, 100);
        progress.finish();
    }
}
