//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 基本下载：`multidown <url>`
//! - 批量下载：`multidown -f urls.txt`
//! - 编辑配置：`multidown -e`
//! - 指定配置：`multidown -c config.conf <url>`
//! - 调整并发：`multidown -t 8 -p 2 <url>...`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/multidown/multidown.conf`
//! - macOS: `~/Library/Application Support/multidown/multidown.conf`
//! - Linux: `~/.config/multidown/multidown.conf`

use clap::Parser;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::utils::validator;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/multidown/multidown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/multidown/multidown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/multidown/multidown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// 从 URL 路径的最后一段推断文件名
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(name.to_string())
}

/// MultiDown 命令行参数
///
/// 示例用法：
///   multidown https://example.com/file.zip
///   multidown -e  # 编辑配置文件
///   multidown -c /path/to/config.conf https://example.com/file.zip
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "multidown",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个用 Rust 编写的多线程分段下载器",
    long_about = "支持并发任务、分段下载和断点续传的下载器。中断（Ctrl-C）时保存断点，下次运行同样的命令即可继续。\n\n示例：\n  multidown https://example.com/file.zip\n  multidown -e\n  multidown -t 8 -p 2 -d ./out https://example.com/a.zip https://example.com/b.zip\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    #[arg(long, short = 'd', help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 只在下载单个URL时生效
    #[arg(long, short = 'n', help = "指定下载文件名，覆盖URL自动推断（仅单个URL）。")]
    pub file_name: Option<String>,

    #[arg(long, short = 't', help = "每个任务的分段线程数，覆盖配置文件中的设置。")]
    pub thread_count: Option<usize>,

    #[arg(long, short = 'p', help = "同时下载的任务数，覆盖配置文件中的设置。")]
    pub parallel_task_count: Option<usize>,

    #[arg(long, help = "不把断点记录写到磁盘。")]
    pub no_resume: bool,

    #[arg(long, default_value = "info", help = "日志级别：error/warn/info/debug/trace。")]
    pub log_level: String,

    #[arg(long, help = "日志文件路径，不指定时输出到标准错误。")]
    pub log_file: Option<String>,
}

impl Args {
    /// 解析命令行参数并加载配置
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();
        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 加载配置文件并合并命令行参数；`-e` 打开编辑器后直接退出
    pub fn load_config(&self) -> Result<Config, DownloadError> {
        if self.edit_config {
            if !Path::new(&self.config).exists() {
                Config::default().save_with_tutorial(&self.config)?;
            }
            open_config_in_editor(&self.config);
            std::process::exit(0);
        }

        let mut config = Config::load(&self.config)?;
        if let Some(threads) = self.thread_count {
            validator::validate_thread_count(threads).map_err(|e| DownloadError::Config(e.to_string()))?;
        }
        config.merge_from_args(self);
        config.validate()?;
        Ok(config)
    }

    /// 命令行和URL文件中的全部URL
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            let content =
                fs::read_to_string(file_path).map_err(|e| DownloadError::storage(Path::new(file_path), e))?;
            // 按行读取URL，忽略空行和注释
            urls.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }

        if urls.is_empty() {
            return Err(DownloadError::Config(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }
        validator::validate_urls(&urls).map_err(|e| match e.downcast::<DownloadError>() {
            Ok(err) => err,
            Err(other) => DownloadError::InvalidUrl(other.to_string()),
        })?;
        Ok(urls)
    }

    /// 第 `index` 个URL的保存路径
    pub fn destination_for(&self, config: &Config, url: &str, index: usize, total: usize) -> PathBuf {
        let name = match &self.file_name {
            Some(name) if total == 1 => name.clone(),
            _ => file_name_from_url(url).unwrap_or_else(|| format!("download_{}", index + 1)),
        };
        Path::new(&config.download_dir).join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["multidown", "-t", "8", "-p", "2", "--no-resume", "https://example.com/a.zip"])
            .unwrap();
        assert_eq!(args.urls, ["https://example.com/a.zip"]);
        assert_eq!(args.thread_count, Some(8));
        assert_eq!(args.parallel_task_count, Some(2));
        assert!(args.no_resume);
        assert_eq!(args.log_level, "info");
        assert!(args.download_dir.is_none());
    }

    #[test]
    fn test_config_loading_merges_flags() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("multidown.conf");
        let config_path = config_path.to_string_lossy().into_owned();

        let args = Args::try_parse_from([
            "multidown",
            "-c",
            config_path.as_str(),
            "-d",
            "/tmp/out",
            "-t",
            "6",
            "https://example.com/file.zip",
        ])
        .unwrap();
        let config = args.load_config().unwrap();
        assert!(Path::new(&config_path).exists());
        assert_eq!(config.download_dir, "/tmp/out");
        assert_eq!(config.thread_count, 6);

        let args = Args::try_parse_from(["multidown", "-c", config_path.as_str(), "-t", "100", "https://example.com/f"])
            .unwrap();
        assert!(matches!(args.load_config(), Err(DownloadError::Config(_))));
    }

    #[test]
    fn test_url_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let url_file = dir.path().join("urls.txt");
        fs::write(
            &url_file,
            "# 这是一个注释\nhttps://example.com/file1.zip\n\n  https://example.com/file2.zip  \n",
        )
        .unwrap();

        let url_file = url_file.to_string_lossy().into_owned();
        let args = Args::try_parse_from(["multidown", "-f", url_file.as_str()]).unwrap();
        let urls = args.get_urls().unwrap();
        assert_eq!(urls, ["https://example.com/file1.zip", "https://example.com/file2.zip"]);
    }

    #[test]
    fn test_url_validation_errors() {
        let args = Args::try_parse_from(["multidown"]).unwrap();
        assert!(matches!(args.get_urls(), Err(DownloadError::Config(_))));

        let args = Args::try_parse_from(["multidown", "ftp://example.com/a"]).unwrap();
        assert!(matches!(args.get_urls(), Err(DownloadError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_destination_naming() {
        let config = Config {
            download_dir: "/data".to_string(),
            ..Config::default()
        };
        let args = Args::try_parse_from(["multidown", "-n", "custom.bin", "https://example.com/a.zip"]).unwrap();
        assert_eq!(
            args.destination_for(&config, "https://example.com/a.zip", 0, 1),
            PathBuf::from("/data/custom.bin")
        );
        assert_eq!(
            args.destination_for(&config, "https://example.com/dir/b.iso?x=1", 1, 2),
            PathBuf::from("/data/b.iso")
        );
        assert_eq!(
            args.destination_for(&config, "https://example.com/", 2, 3),
            PathBuf::from("/data/download_3")
        );
    }
}
