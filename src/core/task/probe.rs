use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::core::error::DownloadError;
use crate::core::http::{ByteRange, RangeResponse, RangeTransport};
use crate::utils::validator;

/// 远程资源信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInfo {
    pub total_size: Option<u64>,
    pub supports_range: bool,
    /// 资源标识：优先 ETag，没有时退回 Last-Modified
    pub resource_token: Option<String>,
}

/// `Content-Range` 中的数字部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: Option<u64>,
    pub last: Option<u64>,
    pub complete_length: Option<u64>,
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^bytes\s+(?:(\d+)-(\d+)|\*)/(\d+|\*)$").ok())
        .as_ref()?;
    let caps = pattern.captures(value.trim())?;
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(ContentRange {
        first: number(1),
        last: number(2),
        complete_length: number(3),
    })
}

pub fn resource_token(response: &RangeResponse) -> Option<String> {
    response
        .etag
        .as_ref()
        .map(|etag| format!("etag:{}", etag))
        .or_else(|| response.last_modified.as_ref().map(|lm| format!("last-modified:{}", lm)))
}

/// 用 1 字节的范围请求探测大小、范围支持和资源标识
///
/// 206 说明支持范围请求；200 说明服务器忽略了 `Range`，只能单段下载。
pub async fn probe(transport: &dyn RangeTransport, url: &str) -> Result<RemoteInfo, DownloadError> {
    validator::check_url(url)?;

    let response = transport.get(url, Some(ByteRange::new(0, Some(1)))).await?;
    let token = resource_token(&response);
    let content_range = response.content_range.as_deref().and_then(parse_content_range);

    let info = match response.status {
        206 => {
            let total_size = content_range.and_then(|cr| cr.complete_length);
            RemoteInfo {
                total_size,
                // 不知道总大小就没法切分
                supports_range: total_size.is_some(),
                resource_token: token,
            }
        }
        200 => RemoteInfo {
            total_size: response.content_length,
            supports_range: false,
            resource_token: token,
        },
        // 空文件对 bytes=0-0 返回 416
        416 => RemoteInfo {
            total_size: Some(content_range.and_then(|cr| cr.complete_length).unwrap_or(0)),
            supports_range: false,
            resource_token: token,
        },
        status => return Err(DownloadError::Status(status)),
    };

    log::debug!(
        "探测完成 {}: 大小={:?}, 支持范围请求={}, 标识={:?}",
        url,
        info.total_size,
        info.supports_range,
        info.resource_token
    );
    Ok(info)
}
