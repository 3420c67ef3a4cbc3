use chrono::{DateTime, Local}; // 用于获取本地时间
use env_logger::{Builder, Target};
use log::{Level, LevelFilter};
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 解析日志级别，无法识别时使用 info
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

/// 一行日志：`2024-01-01 12:00:00 [INFO] - message`
pub fn format_line(time: &DateTime<Local>, level: Level, message: impl Display) -> String {
    format!("{} [{}] - {}", time.format(TIME_FORMAT), level, message)
}

/// 初始化全局日志
///
/// `RUST_LOG` 优先于 `level`；给出 `file` 时写入文件（追加），否则写到 stderr。
pub fn init_logger(level: LevelFilter, file: Option<&str>) -> anyhow::Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "{}", format_line(&Local::now(), record.level(), record.args()))
        });

    if let Some(path) = file {
        // 确保日志目录存在
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}
