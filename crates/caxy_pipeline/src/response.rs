//! Fully-buffered origin response reader.
//!
//! Reads the status line and headers, then materializes the whole body
//! before returning: the cache stores payload bytes, so chunked framing is
//! decoded here rather than passed through.

use bytes::{Buf, BytesMut};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Parsed origin response with the body fully materialized.
#[derive(Debug)]
pub struct OriginResponse {
    pub status: StatusCode,
    /// Header pairs in wire order, framing headers included; the response
    /// writer filters hop-by-hop names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Read one complete response. Returns the response and whether the
/// connection can go back to the pool.
pub(crate) async fn read_origin_response<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    io_timeout: Duration,
    max_header_bytes: usize,
    max_body_bytes: usize,
) -> anyhow::Result<(OriginResponse, bool)>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let headers_end = loop {
        if let Some(pos) = find_headers_end(buf) {
            break pos;
        }
        if max_header_bytes > 0 && buf.len() > max_header_bytes {
            anyhow::bail!("origin response headers too large");
        }
        if read_more(stream, buf, io_timeout).await? == 0 {
            anyhow::bail!("origin closed the connection before sending a full response head");
        }
    };

    let head = buf.split_to(headers_end + 4);
    let head_str = String::from_utf8_lossy(&head[..headers_end]).to_string();

    let mut lines = head_str.lines();
    let status_line = lines.next().unwrap_or("");
    let (status, is_http10) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    let mut connection_close = false;
    let mut connection_keep_alive = false;
    let mut is_chunked = false;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        match name.to_ascii_lowercase().as_str() {
            "content-length" => {
                content_length = value.parse::<usize>().ok();
            }
            "connection" => {
                let tokens = value.to_ascii_lowercase();
                if tokens.contains("close") {
                    connection_close = true;
                }
                if tokens.contains("keep-alive") {
                    connection_keep_alive = true;
                }
            }
            "transfer-encoding" => {
                if value.to_ascii_lowercase().contains("chunked") {
                    is_chunked = true;
                }
            }
            _ => {}
        }

        headers.push((name.to_string(), value.to_string()));
    }

    let body;
    let framing_reusable;
    if !status_allows_body(status) {
        body = Vec::new();
        framing_reusable = true;
    } else if is_chunked {
        body = read_chunked_body(stream, buf, io_timeout, max_body_bytes).await?;
        framing_reusable = true;
    } else if let Some(len) = content_length {
        if max_body_bytes > 0 && len > max_body_bytes {
            anyhow::bail!("origin response body too large ({len} bytes)");
        }
        body = read_exact_body(stream, buf, len, io_timeout).await?;
        framing_reusable = true;
    } else {
        // No framing information: the body runs to EOF and the connection
        // is spent.
        body = read_to_eof(stream, buf, io_timeout, max_body_bytes).await?;
        framing_reusable = false;
    }

    let reusable = framing_reusable
        && if is_http10 {
            connection_keep_alive && !connection_close
        } else {
            !connection_close
        };

    debug!(
        target: "caxy::origin",
        status = status.as_u16(),
        body_len = body.len(),
        reusable,
        "Finished reading origin response"
    );

    Ok((
        OriginResponse {
            status,
            headers,
            body,
        },
        reusable,
    ))
}

fn parse_status_line(line: &str) -> anyhow::Result<(StatusCode, bool)> {
    let mut parts = line.split_whitespace();
    let version = parts.next().unwrap_or("");
    let code = parts
        .next()
        .and_then(|raw| raw.parse::<u16>().ok())
        .and_then(|raw| StatusCode::from_u16(raw).ok());

    match code {
        Some(status) if version.starts_with("HTTP/") => Ok((status, version == "HTTP/1.0")),
        _ => anyhow::bail!("malformed origin status line: {line:?}"),
    }
}

/// 1xx, 204 and 304 responses carry no body regardless of their headers.
fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

fn find_headers_end(buf: &BytesMut) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_more<S>(stream: &mut S, buf: &mut BytesMut, io_timeout: Duration) -> anyhow::Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut tmp = [0u8; 4096];
    match timeout(io_timeout, stream.read(&mut tmp)).await {
        Ok(res) => {
            let n = res?;
            if n > 0 {
                buf.extend_from_slice(&tmp[..n]);
            }
            Ok(n)
        }
        Err(_) => anyhow::bail!("origin read timed out"),
    }
}

async fn read_exact_body<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    len: usize,
    io_timeout: Duration,
) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::with_capacity(len);
    take_exact(stream, buf, len, &mut body, io_timeout).await?;
    Ok(body)
}

async fn read_to_eof<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    io_timeout: Duration,
    max_body_bytes: usize,
) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::new();
    loop {
        if !buf.is_empty() {
            body.extend_from_slice(buf);
            buf.clear();
        }
        if max_body_bytes > 0 && body.len() > max_body_bytes {
            anyhow::bail!("origin response body too large");
        }
        if read_more(stream, buf, io_timeout).await? == 0 {
            return Ok(body);
        }
    }
}

async fn read_chunked_body<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    io_timeout: Duration,
    max_body_bytes: usize,
) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::new();

    loop {
        let line = read_line(stream, buf, io_timeout).await?;
        let size_str = std::str::from_utf8(&line[..line.len() - 2])
            .map_err(|_| anyhow::anyhow!("chunk size line is not valid ascii"))?
            .split(';')
            .next()
            .unwrap_or("")
            .trim();
        let chunk_size = usize::from_str_radix(size_str, 16)
            .map_err(|_| anyhow::anyhow!("invalid chunk size: {size_str:?}"))?;

        if chunk_size == 0 {
            // Trailer section: lines until the blank terminator.
            loop {
                let trailer = read_line(stream, buf, io_timeout).await?;
                if trailer == b"\r\n" {
                    return Ok(body);
                }
            }
        }

        if max_body_bytes > 0 && body.len() + chunk_size > max_body_bytes {
            anyhow::bail!("origin response body too large");
        }

        take_exact(stream, buf, chunk_size, &mut body, io_timeout).await?;

        let mut terminator = Vec::with_capacity(2);
        take_exact(stream, buf, 2, &mut terminator, io_timeout).await?;
        if terminator != b"\r\n" {
            anyhow::bail!("malformed chunk terminator");
        }
    }
}

/// Move exactly `len` bytes from the buffered stream into `out`.
async fn take_exact<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    len: usize,
    out: &mut Vec<u8>,
    io_timeout: Duration,
) -> anyhow::Result<()>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut remaining = len;
    while remaining > 0 {
        if !buf.is_empty() {
            let take = remaining.min(buf.len());
            out.extend_from_slice(&buf[..take]);
            buf.advance(take);
            remaining -= take;
            continue;
        }
        if read_more(stream, buf, io_timeout).await? == 0 {
            anyhow::bail!(
                "origin closed the connection mid-body ({} of {len} bytes missing)",
                remaining
            );
        }
    }
    Ok(())
}

/// Read one CRLF-terminated line, CRLF included.
async fn read_line<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    io_timeout: Duration,
) -> anyhow::Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos + 2);
            return Ok(line.to_vec());
        }
        if read_more(stream, buf, io_timeout).await? == 0 {
            anyhow::bail!("origin closed the connection mid-line");
        }
    }
}
