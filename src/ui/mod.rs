mod progress;

use std::fmt;
pub use progress::{ProgressManager, Tally};

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

pub struct DownloadSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub elapsed_time: std::time::Duration,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
}

impl DownloadSummary {
    pub fn from_tally(total_files: usize, tally: &Tally, elapsed_time: std::time::Duration) -> Self {
        Self {
            total_files,
            total_size: tally.total_bytes,
            elapsed_time,
            success_count: tally.succeeded,
            failed_count: tally.failed,
            cancelled_count: tally.cancelled,
        }
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "总文件数: {}", self.total_files)?;
        writeln!(f, "总大小: {}", format_size(self.total_size))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        if self.cancelled_count > 0 {
            writeln!(f, "已取消: {}", self.cancelled_count)?;
        }
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(10 * 1024 * 1024), "10.00 MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 * 1024), "5120.00 GB");
    }

    #[test]
    fn test_summary_display() {
        let tally = Tally {
            succeeded: 2,
            failed: 1,
            cancelled: 0,
            total_bytes: 2048,
        };
        let text = DownloadSummary::from_tally(3, &tally, Duration::from_millis(1500)).to_string();
        assert!(text.contains("总文件数: 3"));
        assert!(text.contains("总大小: 2.00 KB"));
        assert!(text.contains("耗时: 1.50秒"));
        assert!(text.contains("失败: 1"));
        assert!(!text.contains("已取消"));
    }
}
