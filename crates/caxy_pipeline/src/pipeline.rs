//! The per-request proxy state machine.
//!
//! parse -> cache lookup -> (hit: serve) | (miss: fetch -> buffer -> store
//! -> serve). Lookup and store run inside the cache critical section; the
//! origin fetch never does.

use std::sync::Arc;
use std::time::Duration;

use caxy_cache::CacheStore;
use caxy_config::CaxyConfig;
use caxy_http::responses::send_proxied;
use caxy_http::ClientStream;
use tracing::{debug, error, instrument};

use crate::error::PipelineError;
use crate::origin::OriginClient;
use crate::response::OriginResponse;
use crate::target::normalize_target;

/// Header names never copied from the origin response: connection framing
/// is owned by the response writer, cache status by the pipeline.
const SKIPPED_ORIGIN_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "server",
];

pub struct Pipeline {
    cache: Arc<CacheStore>,
    origin: OriginClient,
}

impl Pipeline {
    pub fn new(cache: Arc<CacheStore>, cfg: &CaxyConfig) -> Self {
        Self {
            cache,
            origin: OriginClient::new(
                Duration::from_millis(cfg.request_timeout),
                cfg.max_response_headers_bytes as usize,
                cfg.max_response_body_bytes as usize,
            ),
        }
    }

    /// Handle one `/proxy` request, writing the response to `stream`.
    ///
    /// Every error except `ClientWrite` is returned while the wire is still
    /// untouched, so the caller can answer with the JSON envelope.
    #[instrument(skip(self, stream, raw_target))]
    pub async fn serve(
        &self,
        stream: &mut dyn ClientStream,
        raw_target: Option<&str>,
    ) -> Result<(), PipelineError> {
        let target = normalize_target(raw_target)?;

        if let Some(entry) = self.cache.find(&target.key) {
            debug!(target: "caxy::pipeline", key = %target.key, "Cache hit");

            let headers = vec![
                ("X-Cache".to_string(), "HIT".to_string()),
                ("X-Cache-Date".to_string(), entry.inserted_at.to_rfc3339()),
                ("X-Cache-Lookup".to_string(), target.key.clone()),
                ("Content-Type".to_string(), "text/html".to_string()),
            ];
            return send_proxied(stream, 200, &headers, &entry.data)
                .await
                .map_err(PipelineError::ClientWrite);
        }

        debug!(target: "caxy::pipeline", key = %target.key, "Cache miss; fetching origin");
        let response = self.origin.fetch(&target).await?;

        let mut headers = vec![
            ("X-Cache".to_string(), "MISS".to_string()),
            ("X-Cache-Lookup".to_string(), target.key.clone()),
        ];

        match self.cache.add(response.body.clone(), &target.key) {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    target: "caxy::pipeline",
                    key = %target.key,
                    size = response.body.len(),
                    "Response refused admission to cache"
                );
            }
            Err(e) => {
                error!(target: "caxy::pipeline", key = %target.key, error = %e, "Failed to cache response");
                headers.push((
                    "X-Cache-Error".to_string(),
                    "Failed to cache response".to_string(),
                ));
            }
        }

        overlay_origin_headers(&mut headers, &response);

        send_proxied(stream, response.status.as_u16(), &headers, &response.body)
            .await
            .map_err(PipelineError::ClientWrite)
    }
}

/// Append the origin headers onto the pipeline defaults. Framing and
/// cache-status names are dropped; `Content-Type` falls back to text/html
/// when the origin did not set one.
fn overlay_origin_headers(headers: &mut Vec<(String, String)>, response: &OriginResponse) {
    let mut saw_content_type = false;

    for (name, value) in &response.headers {
        let lower = name.to_ascii_lowercase();
        if SKIPPED_ORIGIN_HEADERS.contains(&lower.as_str()) || lower.starts_with("x-cache") {
            continue;
        }
        if lower == "content-type" {
            saw_content_type = true;
        }
        headers.push((name.clone(), value.clone()));
    }

    if !saw_content_type {
        headers.push(("Content-Type".to_string(), "text/html".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn response_with_headers(headers: Vec<(String, String)>) -> OriginResponse {
        OriginResponse {
            status: StatusCode::OK,
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn test_overlay_prefers_origin_content_type() {
        let mut headers = vec![("X-Cache".to_string(), "MISS".to_string())];
        let response = response_with_headers(vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Length".to_string(), "12".to_string()),
            ("Connection".to_string(), "close".to_string()),
            ("ETag".to_string(), "\"abc\"".to_string()),
        ]);

        overlay_origin_headers(&mut headers, &response);

        assert!(headers.contains(&("Content-Type".to_string(), "application/json".to_string())));
        assert!(headers.contains(&("ETag".to_string(), "\"abc\"".to_string())));
        assert!(!headers.iter().any(|(n, _)| n == "Content-Length"));
        assert!(!headers.iter().any(|(n, _)| n == "Connection"));
    }

    #[test]
    fn test_overlay_defaults_content_type_to_html() {
        let mut headers = Vec::new();
        overlay_origin_headers(&mut headers, &response_with_headers(Vec::new()));

        assert_eq!(
            headers,
            vec![("Content-Type".to_string(), "text/html".to_string())]
        );
    }

    #[tokio::test]
    async fn serve_answers_hits_from_cache_without_an_origin() {
        let cfg = CaxyConfig::default();
        let cache = Arc::new(CacheStore::new(1024, 1024));
        cache
            .add(b"cached body".to_vec(), "http://example.test/a")
            .expect("seed cache");
        let pipeline = Pipeline::new(cache, &cfg);

        let (mut near, mut far) = tokio::io::duplex(64 * 1024);
        pipeline
            .serve(&mut near, Some("http://example.test/a"))
            .await
            .expect("hit must be served");
        drop(near);

        let mut out = Vec::new();
        far.read_to_end(&mut out).await.expect("read response");
        let text = String::from_utf8_lossy(&out);

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("X-Cache: HIT\r\n"));
        assert!(text.contains("X-Cache-Date: "));
        assert!(text.contains("X-Cache-Lookup: http://example.test/a\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.ends_with("cached body"));
    }

    #[tokio::test]
    async fn serve_rejects_a_missing_target_before_touching_the_wire() {
        let cfg = CaxyConfig::default();
        let pipeline = Pipeline::new(Arc::new(CacheStore::new(1024, 1024)), &cfg);

        let (mut near, mut far) = tokio::io::duplex(1024);
        let err = pipeline.serve(&mut near, None).await.unwrap_err();
        drop(near);

        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.to_string(), "No target URL provided");

        let mut out = Vec::new();
        far.read_to_end(&mut out).await.expect("read");
        assert!(out.is_empty(), "nothing may be written on a parse failure");
    }
}
