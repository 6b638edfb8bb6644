//! Target URL validation and normalization.
//!
//! The canonical form produced here is the cache key, so every tolerated
//! spelling of the same resource must collapse to one string.

use url::Url;

use crate::error::PipelineError;

/// Scheme of a normalized target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A validated, canonicalized proxy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus query, ready for the outbound request line.
    pub request_path: String,
    /// Canonical form, used as the cache key.
    pub key: String,
}

impl Target {
    /// Value for the outbound `Host` header; default ports are omitted.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Normalize the raw `targetUrl` query value into a canonical target.
///
/// Trims whitespace, unwraps one accidental `/proxy?targetUrl=` re-wrapping,
/// defaults the scheme to `http://`, strips trailing slashes, and parses the
/// result as an absolute URL.
pub fn normalize_target(raw: Option<&str>) -> Result<Target, PipelineError> {
    let raw = raw.map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(PipelineError::BadRequest("No target URL provided".into()));
    }

    let mut value = match strip_proxy_wrapping(raw) {
        Some(unwrapped) => unwrapped,
        None => raw.to_string(),
    };

    if !has_http_scheme(&value) {
        value = format!("http://{value}");
    }

    let value = value.trim_end_matches('/');

    let parsed =
        Url::parse(value).map_err(|_| PipelineError::BadRequest("Invalid target URL".into()))?;

    let scheme = match parsed.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        _ => return Err(PipelineError::BadRequest("Invalid target URL".into())),
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| PipelineError::BadRequest("Invalid target URL".into()))?
        .to_string();

    let port = parsed
        .port_or_known_default()
        .unwrap_or_else(|| scheme.default_port());

    let mut request_path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        request_path.push('?');
        request_path.push_str(query);
    }

    Ok(Target {
        scheme,
        host,
        port,
        request_path,
        key: parsed.to_string(),
    })
}

/// A value that arrived wrapped in another proxy URL is unwrapped and
/// percent-decoded exactly once.
fn strip_proxy_wrapping(value: &str) -> Option<String> {
    let rest = value.strip_prefix("/proxy?targetUrl=")?;
    match urlencoding::decode(rest) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(rest.to_string()),
    }
}

fn has_http_scheme(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(raw: &str) -> String {
        normalize_target(Some(raw)).expect("must normalize").key
    }

    #[test]
    fn test_equivalent_spellings_share_one_key() {
        let canonical = key_of("http://example.test/y");
        assert_eq!(key_of("example.test/y"), canonical);
        assert_eq!(key_of("http://example.test/y/"), canonical);
        assert_eq!(key_of("  http://example.test/y  "), canonical);
    }

    #[test]
    fn test_missing_value_is_rejected() {
        for raw in [None, Some(""), Some("   ")] {
            let err = normalize_target(raw).unwrap_err();
            assert_eq!(err.to_string(), "No target URL provided");
            assert_eq!(err.status_code(), Some(400));
        }
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        for raw in ["http://", "not a url", "http://exa mple.test/"] {
            let err = normalize_target(Some(raw)).unwrap_err();
            assert_eq!(err.to_string(), "Invalid target URL");
        }
    }

    #[test]
    fn test_scheme_defaults_and_ports() {
        let plain = normalize_target(Some("example.test/a")).unwrap();
        assert_eq!(plain.scheme, Scheme::Http);
        assert_eq!(plain.port, 80);
        assert_eq!(plain.host_header(), "example.test");

        let tls = normalize_target(Some("https://example.test/a")).unwrap();
        assert_eq!(tls.scheme, Scheme::Https);
        assert_eq!(tls.port, 443);

        let custom = normalize_target(Some("http://example.test:8081/a")).unwrap();
        assert_eq!(custom.port, 8081);
        assert_eq!(custom.host_header(), "example.test:8081");
    }

    #[test]
    fn test_scheme_match_is_case_insensitive() {
        let target = normalize_target(Some("HTTPS://Example.Test/A")).unwrap();
        assert_eq!(target.scheme, Scheme::Https);
        assert_eq!(target.host, "example.test");
        assert_eq!(target.request_path, "/A");
    }

    #[test]
    fn test_double_wrapped_value_is_unwrapped_once() {
        let wrapped = "/proxy?targetUrl=http%3A%2F%2Fexample.test%2Fz";
        assert_eq!(key_of(wrapped), key_of("http://example.test/z"));
    }

    #[test]
    fn test_query_survives_in_request_path_and_key() {
        let target = normalize_target(Some("http://example.test/search?q=rust")).unwrap();
        assert_eq!(target.request_path, "/search?q=rust");
        assert_eq!(target.key, "http://example.test/search?q=rust");
    }

    #[test]
    fn test_bare_host_gets_root_path() {
        let target = normalize_target(Some("example.test")).unwrap();
        assert_eq!(target.request_path, "/");
        assert_eq!(target.key, "http://example.test/");
    }
}
