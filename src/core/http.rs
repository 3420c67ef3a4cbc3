//! HTTP 传输层
//!
//! 引擎只依赖 [`RangeTransport`]：生产环境使用基于 `awc` 的 [`AwcTransport`]，
//! 测试使用内存中的替身。

use async_trait::async_trait;
use awc::error::SendRequestError;
use awc::http::header;
use bytes::Bytes;
use futures::stream::{LocalBoxStream, StreamExt};
use std::rc::Rc;
use std::time::Duration;

use crate::core::error::DownloadError;

/// 请求的字节区间，`end` 不包含在内，`None` 表示一直读到结尾
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// `Range` 请求头，HTTP 的区间是闭区间
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end.saturating_sub(1)),
            None => format!("bytes={}-", self.start),
        }
    }
}

pub type BodyStream = LocalBoxStream<'static, Result<Bytes, DownloadError>>;

/// 引擎关心的响应信息
pub struct RangeResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

#[async_trait(?Send)]
pub trait RangeTransport {
    /// 发起 GET 请求，`range` 为 `None` 时不带 `Range` 头
    async fn get(&self, url: &str, range: Option<ByteRange>) -> Result<RangeResponse, DownloadError>;
}

pub type SharedTransport = Rc<dyn RangeTransport>;

/// 基于 awc 的传输实现
#[derive(Clone)]
pub struct AwcTransport {
    client: awc::Client,
}

impl AwcTransport {
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Self {
        let client = awc::Client::builder()
            .timeout(connect_timeout)
            .add_default_header((header::USER_AGENT, user_agent.to_string()))
            // 解压会让字节偏移和磁盘偏移对不上
            .add_default_header((header::ACCEPT_ENCODING, "identity"))
            .finish();
        Self { client }
    }
}

fn header_string(headers: &header::HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

#[async_trait(?Send)]
impl RangeTransport for AwcTransport {
    async fn get(&self, url: &str, range: Option<ByteRange>) -> Result<RangeResponse, DownloadError> {
        let mut request = self.client.get(url).no_decompress();
        if let Some(range) = range {
            request = request.insert_header((header::RANGE, range.header_value()));
        }

        let response = request.send().await.map_err(|e| match e {
            SendRequestError::Timeout => DownloadError::Timeout,
            SendRequestError::Url(e) => DownloadError::InvalidUrl(e.to_string()),
            other => DownloadError::Network(other.to_string()),
        })?;

        let headers = response.headers();
        let content_length = header_string(headers, header::CONTENT_LENGTH)
            .and_then(|s| s.parse::<u64>().ok());
        let content_range = header_string(headers, header::CONTENT_RANGE);
        let etag = header_string(headers, header::ETAG);
        let last_modified = header_string(headers, header::LAST_MODIFIED);
        let status = response.status().as_u16();

        let body = response
            .map(|chunk| chunk.map_err(|e| DownloadError::Network(e.to_string())))
            .boxed_local();

        Ok(RangeResponse {
            status,
            content_length,
            content_range,
            etag,
            last_modified,
            body,
        })
    }
}
