use std::path::Path;
use thiserror::Error;

/// 下载引擎的统一错误类型
///
/// 需要跟随事件一起跨线程投递给观察者，所以只保存字符串化的信息并实现 `Clone`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("不支持的协议: {0}")]
    UnsupportedScheme(String),

    #[error("探测远程资源失败 {url}: {reason}")]
    Probe { url: String, reason: String },

    #[error("服务器不支持范围请求")]
    RangeUnsupported,

    #[error("网络错误: {0}")]
    Network(String),

    #[error("读取超时")]
    Timeout,

    #[error("服务器返回异常状态码: {0}")]
    Status(u16),

    #[error("分段 {index} 传输错误: {reason}")]
    SegmentIo { index: usize, reason: String },

    #[error("分段 {index} 失败 {retries} 次后放弃: {source}")]
    SegmentFailed {
        index: usize,
        retries: u32,
        source: Box<DownloadError>,
    },

    #[error("远程资源已变化")]
    ResourceChanged,

    #[error("存储错误 {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("断点记录错误: {0}")]
    Breakpoint(String),

    #[error("配置无效: {0}")]
    Config(String),

    #[error("下载引擎不可用: {0}")]
    Mailbox(String),
}

impl DownloadError {
    /// 同一子区间重新请求有可能成功的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_)
            | DownloadError::Timeout
            | DownloadError::SegmentIo { .. } => true,
            DownloadError::Status(code) => *code == 408 || *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// 分段请求可重试的错误：在通用的瞬时错误之外，任何意外状态码都再试一次
    pub fn is_segment_retryable(&self) -> bool {
        self.is_retryable() || matches!(self, DownloadError::Status(_))
    }

    pub fn storage(path: &Path, err: impl std::fmt::Display) -> Self {
        DownloadError::Storage {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn segment_io(index: usize, reason: impl Into<String>) -> Self {
        DownloadError::SegmentIo {
            index,
            reason: reason.into(),
        }
    }
}

impl From<actix::MailboxError> for DownloadError {
    fn from(err: actix::MailboxError) -> Self {
        DownloadError::Mailbox(err.to_string())
    }
}

impl From<toml::de::Error> for DownloadError {
    fn from(err: toml::de::Error) -> Self {
        DownloadError::Config(err.to_string())
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(DownloadError::Network("connection reset".into()).is_retryable());
        assert!(DownloadError::Timeout.is_retryable());
        assert!(DownloadError::segment_io(2, "连接提前关闭").is_retryable());
        assert!(DownloadError::Status(503).is_retryable());
        assert!(DownloadError::Status(429).is_retryable());
        assert!(!DownloadError::Status(404).is_retryable());
        assert!(!DownloadError::storage(Path::new("/tmp/a"), "disk full").is_retryable());
        assert!(!DownloadError::RangeUnsupported.is_retryable());
    }

    #[test]
    fn test_segment_retries_any_status() {
        assert!(DownloadError::Status(404).is_segment_retryable());
        assert!(DownloadError::Status(403).is_segment_retryable());
        assert!(DownloadError::Timeout.is_segment_retryable());
        assert!(!DownloadError::RangeUnsupported.is_segment_retryable());
        assert!(!DownloadError::storage(Path::new("/tmp/a"), "disk full").is_segment_retryable());
    }

    #[test]
    fn test_segment_failed_display() {
        let err = DownloadError::SegmentFailed {
            index: 1,
            retries: 3,
            source: Box::new(DownloadError::Timeout),
        };
        let msg = err.to_string();
        assert!(msg.contains("分段 1"));
        assert!(msg.contains("读取超时"));
    }
}
