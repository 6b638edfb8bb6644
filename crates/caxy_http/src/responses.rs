use http::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const SERVER_TOKEN: &str = concat!("caxy/", env!("CARGO_PKG_VERSION"));

/// CORS block applied to every non-preflight response.
pub const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Methods: GET, HEAD, OPTIONS\r\n\
     Access-Control-Allow-Headers: Accept, Content-Type, Origin\r\n\
     Access-Control-Expose-Headers: X-Cache, X-Cache-Lookup\r\n";

/// CORS block for OPTIONS preflight answers.
const CORS_PREFLIGHT_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Methods: GET, HEAD, OPTIONS\r\n\
     Access-Control-Allow-Headers: Accept, Content-Type, Origin\r\n";

/// JSON body for every failure surfaced before the response head is flushed.
#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a str,
    status: &'a str,
    #[serde(rename = "statusCode")]
    status_code: u16,
}

fn reason(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Error")
}

/// Helper to send a full response with an explicit content type, the
/// standard CORS set, and any extra pre-serialized header lines.
pub async fn send_response<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    code: u16,
    content_type: &str,
    extra_headers: &str,
    body: &[u8],
) -> anyhow::Result<()> {
    let head = format!(
        "HTTP/1.1 {code} {}\r\n\
         Server: {SERVER_TOKEN}\r\n\
         {CORS_HEADERS}\
         {extra_headers}\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        reason(code),
        body.len()
    );

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Send a JSON response body.
pub async fn send_json<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    code: u16,
    body: &[u8],
) -> anyhow::Result<()> {
    send_response(stream, code, "application/json", "", body).await
}

/// Send the JSON error envelope for a failure that happened before any
/// response bytes were written.
pub async fn send_error_envelope<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&ErrorEnvelope {
        error: message,
        status: "error",
        status_code: code,
    })?;
    send_json(stream, code, &body).await
}

/// Send a bodyless 204, with the preflight CORS block for OPTIONS answers
/// and the full set otherwise.
pub async fn send_no_content<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    preflight: bool,
) -> anyhow::Result<()> {
    let cors = if preflight {
        CORS_PREFLIGHT_HEADERS
    } else {
        CORS_HEADERS
    };
    let head = format!(
        "HTTP/1.1 204 No Content\r\n\
         Server: {SERVER_TOKEN}\r\n\
         {cors}\
         Connection: close\r\n\
         \r\n"
    );
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Send a proxied response. The caller supplies the merged header list
/// (cache-status headers plus any origin overlay); content length and
/// connection handling are owned here.
pub async fn send_proxied<W: AsyncWrite + Unpin + ?Sized>(
    stream: &mut W,
    code: u16,
    headers: &[(String, String)],
    body: &[u8],
) -> anyhow::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {code} {}\r\n\
         Server: {SERVER_TOKEN}\r\n\
         {CORS_HEADERS}",
        reason(code)
    );
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    async fn capture<F, Fut>(write: F) -> String
    where
        F: FnOnce(Cursor<Vec<u8>>) -> Fut,
        Fut: std::future::Future<Output = (Cursor<Vec<u8>>, anyhow::Result<()>)>,
    {
        let (cursor, result) = write(Cursor::new(Vec::new())).await;
        result.expect("write must succeed");
        String::from_utf8(cursor.into_inner()).expect("responses are utf-8 here")
    }

    #[tokio::test]
    async fn error_envelope_has_exact_json_body() {
        let out = capture(|mut c| async move {
            let res = send_error_envelope(&mut c, 400, "No target URL provided").await;
            (c, res)
        })
        .await;

        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Content-Type: application/json\r\n"));
        assert!(out.ends_with(
            "{\"error\":\"No target URL provided\",\"status\":\"error\",\"statusCode\":400}"
        ));
    }

    #[tokio::test]
    async fn every_response_carries_the_cors_set() {
        let out = capture(|mut c| async move {
            let res = send_json(&mut c, 200, b"{}").await;
            (c, res)
        })
        .await;

        assert!(out.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(out.contains("Access-Control-Allow-Methods: GET, HEAD, OPTIONS\r\n"));
        assert!(out.contains("Access-Control-Allow-Headers: Accept, Content-Type, Origin\r\n"));
        assert!(out.contains("Access-Control-Expose-Headers: X-Cache, X-Cache-Lookup\r\n"));
    }

    #[tokio::test]
    async fn preflight_answer_omits_expose_headers() {
        let out = capture(|mut c| async move {
            let res = send_no_content(&mut c, true).await;
            (c, res)
        })
        .await;

        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(out.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(!out.contains("Access-Control-Expose-Headers"));
    }

    #[tokio::test]
    async fn proxied_response_keeps_caller_headers_and_sets_length() {
        let headers = vec![
            ("X-Cache".to_string(), "HIT".to_string()),
            ("Content-Type".to_string(), "text/html".to_string()),
        ];
        let out = capture(|mut c| async move {
            let res = send_proxied(&mut c, 200, &headers, b"hello").await;
            (c, res)
        })
        .await;

        assert!(out.contains("X-Cache: HIT\r\n"));
        assert!(out.contains("Content-Type: text/html\r\n"));
        assert!(out.contains("Content-Length: 5\r\n"));
        assert!(out.ends_with("hello"));
    }
}
