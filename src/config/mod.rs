use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::error::DownloadError;
use crate::core::task::retry::RetryStrategy;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 同时运行的任务数
    pub parallel_task_count: usize,
    /// 每个任务的分段线程数
    pub thread_count: usize,
    /// 最小分段大小（字节）
    pub min_segment_size: u64,
    /// 单次读取超时时间（秒）
    pub timeout: u64,
    /// 建立连接并收到响应头的超时时间（秒）
    pub connect_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 是否把断点记录写到磁盘
    pub enable_resume: bool,
    /// 断点记录目录
    pub breakpoint_dir: String,
    /// 同一分段允许失败的次数，达到后任务失败
    pub retry_count: u32,
    /// 首次重试延迟（毫秒）
    pub retry_delay_ms: u64,
    /// 最大重试延迟（毫秒）
    pub retry_max_delay_ms: u64,
    /// 进度事件的最小间隔（毫秒），0 表示每次读取都通知
    pub progress_interval_ms: u64,
    /// 下载过程中写断点记录的最小间隔（毫秒）
    pub breakpoint_flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            parallel_task_count: 3,
            thread_count: 4,
            min_segment_size: 1024 * 1024,
            timeout: 30,
            connect_timeout: 10,
            user_agent: format!("MultiDown/{}", env!("CARGO_PKG_VERSION")),
            enable_resume: true,
            breakpoint_dir: "./downloads/.multidown".to_string(),
            retry_count: 3,
            retry_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            progress_interval_ms: 200,
            breakpoint_flush_interval_ms: 1000,
        }
    }
}

impl Config {
    /// 加载配置文件，文件不存在时写入默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if !Path::new(path).exists() {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| DownloadError::storage(Path::new(path), e))?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                Ok(Config::default())
            }
        }
    }

    /// 保存带说明的配置文件
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::storage(parent, e))?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::tutorial_header(), config_content);
        fs::write(path, full_content).map_err(|e| DownloadError::storage(Path::new(path), e))
    }

    fn tutorial_header() -> &'static str {
        r#"# MultiDown 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖这里的设置，优先级：命令行 > 配置文件 > 默认值。
# 缺少的字段使用默认值。
#
# download_dir                 默认下载目录
# parallel_task_count          同时运行的任务数，超过 CPU 核数时按核数处理
# thread_count                 每个任务的分段数上限
# min_segment_size             最小分段大小（字节），小文件不会被切得太碎
# timeout                      单次读取超时（秒），超时按可重试错误处理
# connect_timeout              建立连接并收到响应头的超时（秒）
# user_agent                   某些服务器需要特定的 User-Agent
# enable_resume                关闭后断点只保存在内存里，进程退出即丢失
# breakpoint_dir               断点记录目录，每个任务一个 JSON 文件
# retry_count                  同一分段允许失败的次数，达到后任务失败
# retry_delay_ms               首次重试延迟，之后指数退避
# retry_max_delay_ms           重试延迟上限
# progress_interval_ms         进度通知的最小间隔
# breakpoint_flush_interval_ms 下载中写断点记录的最小间隔
#
# 使用示例：
#   multidown https://example.com/file.zip
#   multidown -t 8 -p 2 https://example.com/a.zip https://example.com/b.zip
#   multidown -f urls.txt -d /path/to/downloads
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.thread_count == 0 {
            return Err(DownloadError::Config("线程数必须大于0".to_string()));
        }
        if self.parallel_task_count == 0 {
            return Err(DownloadError::Config("并发任务数必须大于0".to_string()));
        }
        if self.min_segment_size == 0 {
            return Err(DownloadError::Config("最小分段大小必须大于0".to_string()));
        }
        if self.timeout == 0 || self.connect_timeout == 0 {
            return Err(DownloadError::Config("超时时间必须大于0".to_string()));
        }
        if self.download_dir.is_empty() {
            return Err(DownloadError::Config("下载目录不能为空".to_string()));
        }
        if self.enable_resume && self.breakpoint_dir.is_empty() {
            return Err(DownloadError::Config("断点记录目录不能为空".to_string()));
        }
        if self.retry_max_delay_ms < self.retry_delay_ms {
            return Err(DownloadError::Config("最大重试延迟不能小于首次重试延迟".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(thread_count) = args.thread_count {
            self.thread_count = thread_count;
        }
        if let Some(parallel) = args.parallel_task_count {
            self.parallel_task_count = parallel;
        }
        if args.no_resume {
            self.enable_resume = false;
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 并发任务数: {}\n\
            - 线程数: {}\n\
            - 最小分段: {} 字节\n\
            - 超时时间: {} 秒\n\
            - 重试次数: {}\n\
            - 断点续传: {}",
            self.download_dir,
            self.parallel_task_count,
            self.thread_count,
            self.min_segment_size,
            self.timeout,
            self.retry_count,
            if self.enable_resume { "启用" } else { "仅内存" }
        )
    }
}

/// 引擎运行参数，构造引擎时从 [`Config`] 解析一次
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub parallel_task_count: usize,
    pub thread_count: usize,
    pub min_segment_size: u64,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryStrategy,
    pub progress_interval: Duration,
    pub flush_interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions::from_config(&Config::default())
    }
}

impl DownloadOptions {
    pub fn from_config(config: &Config) -> Self {
        DownloadOptions {
            parallel_task_count: config.parallel_task_count,
            thread_count: config.thread_count,
            min_segment_size: config.min_segment_size,
            read_timeout: Duration::from_secs(config.timeout),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            user_agent: config.user_agent.clone(),
            retry: RetryStrategy {
                max_retries: config.retry_count,
                base_delay: Duration::from_millis(config.retry_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
                ..RetryStrategy::default()
            },
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            flush_interval: Duration::from_millis(config.breakpoint_flush_interval_ms),
        }
        .resolved()
    }

    /// 修正越界的参数：并发任务数不超过可用并行度
    pub fn resolved(mut self) -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.parallel_task_count = self.parallel_task_count.clamp(1, available.max(1));
        self.thread_count = self.thread_count.max(1);
        self.min_segment_size = self.min_segment_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.parallel_task_count, 3);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.retry_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.thread_count = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.parallel_task_count = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.retry_max_delay_ms = 10;
        assert!(matches!(config.validate(), Err(DownloadError::Config(_))));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("multidown.conf");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.thread_count = 8;
        config.save_with_tutorial(path).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("MultiDown 配置文件"));

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_creates_default_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multidown.conf");
        let path_str = path.to_str().unwrap();

        assert_eq!(Config::load(path_str).unwrap(), Config::default());
        assert!(path.exists());

        fs::write(&path, "thread_count = \"many\"").unwrap();
        assert_eq!(Config::load(path_str).unwrap(), Config::default());

        fs::write(&path, "thread_count = 12").unwrap();
        let partial = Config::load(path_str).unwrap();
        assert_eq!(partial.thread_count, 12);
        assert_eq!(partial.retry_count, 3);
    }

    #[test]
    fn test_options_resolution() {
        let mut config = Config::default();
        config.parallel_task_count = 10_000;
        config.retry_count = 5;
        let options = DownloadOptions::from_config(&config);
        let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        assert!(options.parallel_task_count >= 1);
        assert!(options.parallel_task_count <= available);
        assert_eq!(options.retry.max_retries, 5);
        assert_eq!(options.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_summary() {
        let summary = Config::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("并发任务数"));
        assert!(summary.contains("启用"));
    }
}
