//! Video source resolution: turns a raw video reference (YouTube URL,
//! direct URL, or inline base64) into a normalized payload for the video
//! provider. Pure I/O plus a process-lifetime cache.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use base64::Engine;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ai_client::VideoSource;
use panelsim_common::PanelsimError;

/// Base64 uploads past this size are likely to be rejected upstream.
const MAX_BASE64_SIZE: usize = 25 * 1024 * 1024;

const BLOCKED_HOSTS: &[&str] = &[
    "169.254.169.254",
    "metadata.google.internal",
    "localhost",
    "127.0.0.1",
];

pub struct VideoResolver {
    http: reqwest::Client,
    youtube_patterns: Vec<Regex>,
    cache: Mutex<HashMap<String, VideoSource>>,
}

impl VideoResolver {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            youtube_patterns: vec![
                Regex::new(r"(?:https?://)?(?:www\.)?youtube\.com/watch").expect("valid regex"),
                Regex::new(r"(?:https?://)?(?:www\.)?youtube\.com/shorts/").expect("valid regex"),
                Regex::new(r"(?:https?://)?youtu\.be/").expect("valid regex"),
            ],
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Detect the source type and resolve it to a provider-ready payload.
    /// Results are cached for the resolver's lifetime keyed by the raw
    /// reference.
    pub async fn resolve(&self, data: &str) -> Result<VideoSource, PanelsimError> {
        {
            let cache = self.cache.lock().await;
            if let Some(source) = cache.get(data) {
                info!("Video source: cache hit");
                return Ok(source.clone());
            }
        }

        let result = if self.is_youtube(data) {
            // Video-capable chat models fetch YouTube natively; pass the
            // URL through after the same safety checks as any other URL.
            info!("Video source: YouTube URL");
            validate_url(data)?;
            VideoSource::Url {
                url: data.to_string(),
            }
        } else if is_url(data) {
            info!("Video source: direct URL");
            let (bytes, media_type) = self.download_url(data).await?;
            VideoSource::Base64 {
                media_type,
                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
            }
        } else {
            // Assume an inline base64-encoded video body.
            info!("Video source: base64");
            VideoSource::Base64 {
                media_type: "video/mp4".to_string(),
                data: data.to_string(),
            }
        };

        let mut cache = self.cache.lock().await;
        cache.entry(data.to_string()).or_insert_with(|| result.clone());
        Ok(result)
    }

    fn is_youtube(&self, data: &str) -> bool {
        self.youtube_patterns.iter().any(|p| p.is_match(data))
    }

    async fn download_url(&self, url: &str) -> Result<(Vec<u8>, String), PanelsimError> {
        validate_url(url)?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PanelsimError::provider("video", format!("Video download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PanelsimError::provider(
                "video",
                format!("Video download failed (HTTP {}): {url}", response.status()),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty()
            && !content_type.starts_with("video/")
            && !content_type.starts_with("application/octet-stream")
        {
            warn!(url, content_type, "Unexpected content-type for video URL");
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PanelsimError::provider("video", format!("Video download failed: {e}")))?
            .to_vec();

        if bytes.len() > MAX_BASE64_SIZE {
            warn!(
                url,
                bytes = bytes.len(),
                limit = MAX_BASE64_SIZE,
                "Downloaded video exceeds base64 upload limit, may fail upstream"
            );
        }

        let media_type = if content_type.starts_with("video/") {
            content_type
        } else {
            "video/mp4".to_string()
        };

        Ok((bytes, media_type))
    }
}

impl Default for VideoResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_url(data: &str) -> bool {
    data.starts_with("http://") || data.starts_with("https://")
}

/// Validate a URL before fetching it: http/https only, no metadata or
/// internal hosts, no private/loopback literal addresses.
fn validate_url(raw: &str) -> Result<(), PanelsimError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| PanelsimError::provider("video", format!("Invalid video URL: {raw}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(PanelsimError::provider(
            "video",
            format!("Unsupported URL scheme: {}", parsed.scheme()),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| PanelsimError::provider("video", "URL has no hostname"))?;

    if BLOCKED_HOSTS.contains(&host) {
        return Err(PanelsimError::provider(
            "video",
            format!("Blocked hostname: {host}"),
        ));
    }

    let lower = host.to_lowercase();
    if lower.ends_with(".local") || lower.ends_with(".internal") {
        return Err(PanelsimError::provider(
            "video",
            format!("Blocked hostname: {host}"),
        ));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(PanelsimError::provider(
                "video",
                format!("URL resolves to private address: {ip}"),
            ));
        }
    }

    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.octets()[0] == 10
                || (v4.octets()[0] == 172 && (16..=31).contains(&v4.octets()[1]))
                || (v4.octets()[0] == 192 && v4.octets()[1] == 168)
        }
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn youtube_url_passes_through() {
        let resolver = VideoResolver::new();
        let source = resolver
            .resolve("https://www.youtube.com/watch?v=abc123")
            .await
            .unwrap();
        assert_eq!(
            source,
            VideoSource::Url {
                url: "https://www.youtube.com/watch?v=abc123".to_string()
            }
        );
    }

    #[tokio::test]
    async fn short_youtube_url_detected() {
        let resolver = VideoResolver::new();
        let source = resolver.resolve("https://youtu.be/abc123").await.unwrap();
        assert!(matches!(source, VideoSource::Url { .. }));
    }

    #[tokio::test]
    async fn inline_base64_passes_through() {
        let resolver = VideoResolver::new();
        let source = resolver.resolve("AAAAHGZ0eXBtcDQy").await.unwrap();
        assert_eq!(
            source,
            VideoSource::Base64 {
                media_type: "video/mp4".to_string(),
                data: "AAAAHGZ0eXBtcDQy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn resolved_sources_are_cached() {
        let resolver = VideoResolver::new();
        let url = "https://www.youtube.com/watch?v=abc123";
        resolver.resolve(url).await.unwrap();
        assert_eq!(resolver.cache.lock().await.len(), 1);
        resolver.resolve(url).await.unwrap();
        assert_eq!(resolver.cache.lock().await.len(), 1);
    }

    #[test]
    fn validate_url_blocks_metadata_endpoints() {
        assert!(validate_url("http://169.254.169.254/latest/meta-data").is_err());
        assert!(validate_url("http://metadata.google.internal/computeMetadata").is_err());
        assert!(validate_url("http://localhost:8080/video.mp4").is_err());
    }

    #[test]
    fn validate_url_blocks_private_addresses() {
        assert!(validate_url("http://10.0.0.5/video.mp4").is_err());
        assert!(validate_url("http://192.168.1.10/video.mp4").is_err());
        assert!(validate_url("http://172.16.0.1/video.mp4").is_err());
        assert!(validate_url("https://internal.service.local/clip").is_err());
    }

    #[test]
    fn validate_url_rejects_other_schemes() {
        assert!(validate_url("ftp://example.com/video.mp4").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn validate_url_allows_public_hosts() {
        assert!(validate_url("https://cdn.example.com/clip.mp4").is_ok());
    }
}
