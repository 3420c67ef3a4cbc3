use anyhow::Result;
use url::Url;

use crate::core::error::DownloadError;

const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

pub fn is_valid_url(url: &str) -> bool {
    check_url(url).is_ok()
}

/// 解析 URL 并确认协议是 http/https
pub fn check_url(url: &str) -> Result<Url, DownloadError> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        return Err(DownloadError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(DownloadError::InvalidUrl(url.to_string()));
    }
    Ok(parsed)
}

pub fn validate_thread_count(threads: usize) -> Result<()> {
    if threads == 0 {
        anyhow::bail!("线程数必须大于0");
    }
    if threads > 64 {
        anyhow::bail!("线程数不能超过64");
    }
    Ok(())
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空");
    }
    for url in urls {
        check_url(url)?;
    }
    Ok(())
}
