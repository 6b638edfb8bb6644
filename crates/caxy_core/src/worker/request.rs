use bytes::BytesMut;
use caxy_config::CaxyConfig;
use caxy_http::responses::send_error_envelope;
use caxy_http::ClientStream;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::timeouts::{read_more, ReadOutcome};

/// Request line of one parsed client request. The query string is kept raw;
/// individual values are decoded by [`query_param`].
#[derive(Debug)]
pub(crate) struct ParsedRequest {
    pub(crate) method: String,
    /// Path with the query string already split off.
    pub(crate) path: String,
    pub(crate) query: Option<String>,
}

/// Read one request head (everything up to the blank line).
///
/// Returns `None` after answering the client (oversized or timed-out
/// requests) or when the connection closed before a request arrived.
pub(crate) async fn read_http_request(
    stream: &mut dyn ClientStream,
    buf: &mut BytesMut,
    cfg: &CaxyConfig,
    idle_timeout: Duration,
) -> anyhow::Result<Option<ParsedRequest>> {
    let max_headers = cfg.max_request_headers_bytes as usize;

    let headers_end = loop {
        if let Some(pos) = find_headers_end(buf) {
            break pos;
        }

        if max_headers > 0 && buf.len() > max_headers {
            warn!(target: "caxy::worker", "Request header section too large");
            send_error_envelope(stream, 400, "Request header section too large").await?;
            return Ok(None);
        }

        match read_more(stream, buf, idle_timeout).await? {
            ReadOutcome::Timeout => {
                if !buf.is_empty() {
                    send_error_envelope(stream, 400, "Request read timed out").await?;
                }
                return Ok(None);
            }
            ReadOutcome::Read(0) => return Ok(None),
            ReadOutcome::Read(_) => {}
        }
    };

    let header_bytes = &buf[..headers_end];
    let headers_str = String::from_utf8_lossy(header_bytes).to_string();

    debug!(
        target: "caxy::worker",
        header_len = headers_str.len(),
        "Parsed HTTP headers"
    );

    Ok(Some(parse_request_line(&headers_str)))
}

fn parse_request_line(headers: &str) -> ParsedRequest {
    let request_line = headers.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("-").to_string();
    let raw_path = parts.next().unwrap_or("/").to_string();

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (raw_path, None),
    };

    ParsedRequest {
        method,
        path,
        query,
    }
}

fn find_headers_end(buf: &BytesMut) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Extract one query parameter, percent-decoded. `+` is treated as a space,
/// as form-encoded senders produce it.
pub(crate) fn query_param(query: &str, name: &str) -> Option<String> {
    for pair in query.split('&') {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        if key != name {
            continue;
        }

        let value = value.replace('+', " ");
        return match urlencoding::decode(&value) {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(_) => Some(value),
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_line_splits_path_and_query() {
        let req = parse_request_line("GET /proxy?targetUrl=http://a.test/x HTTP/1.1\r\nHost: h\r\n");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/proxy");
        assert_eq!(req.query.as_deref(), Some("targetUrl=http://a.test/x"));
    }

    #[test]
    fn parse_request_line_without_query() {
        let req = parse_request_line("GET /status HTTP/1.1\r\n");
        assert_eq!(req.path, "/status");
        assert!(req.query.is_none());
    }

    #[test]
    fn query_param_decodes_percent_escapes() {
        let query = "targetUrl=http%3A%2F%2Fexample.test%2Fa%20b";
        assert_eq!(
            query_param(query, "targetUrl").as_deref(),
            Some("http://example.test/a b")
        );
    }

    #[test]
    fn query_param_picks_the_named_pair() {
        let query = "other=1&targetUrl=example.test&more=2";
        assert_eq!(query_param(query, "targetUrl").as_deref(), Some("example.test"));
        assert_eq!(query_param(query, "missing"), None);
    }

    #[test]
    fn query_param_empty_value_is_empty_string() {
        assert_eq!(query_param("targetUrl=", "targetUrl").as_deref(), Some(""));
        assert_eq!(query_param("targetUrl", "targetUrl").as_deref(), Some(""));
    }
}
