//! Origin fetch client.
//!
//! Holds per-origin keep-alive connection pools. Checkout takes the most
//! recently parked socket (LIFO); sockets go back in only when the response
//! framing left the connection in a reusable state.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::response::{read_origin_response, OriginResponse};
use crate::target::{Scheme, Target};

const USER_AGENT: &str = concat!("caxy/", env!("CARGO_PKG_VERSION"));

/// Byte stream to an origin, plain or TLS.
trait OriginStream: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T> OriginStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

struct PooledStream {
    stream: Box<dyn OriginStream>,
    read_buf: BytesMut,
}

impl PooledStream {
    fn new(stream: Box<dyn OriginStream>) -> Self {
        Self {
            stream,
            read_buf: BytesMut::new(),
        }
    }
}

pub struct OriginClient {
    /// Idle connections keyed by "scheme://host:port".
    pools: DashMap<String, Vec<PooledStream>>,
    tls: TlsConnector,
    io_timeout: Duration,
    max_header_bytes: usize,
    max_body_bytes: usize,
}

impl OriginClient {
    pub fn new(io_timeout: Duration, max_header_bytes: usize, max_body_bytes: usize) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            pools: DashMap::new(),
            tls: TlsConnector::from(Arc::new(tls_config)),
            io_timeout,
            max_header_bytes,
            max_body_bytes,
        }
    }

    /// Issue a GET for `target` and buffer the whole response.
    pub async fn fetch(&self, target: &Target) -> Result<OriginResponse, PipelineError> {
        let request = build_request(target);
        let pool_key = pool_key(target);

        let (mut conn, reused) = self.checkout(&pool_key, target).await?;

        // A parked socket may have died while idle; retry once on a fresh
        // connection before giving up.
        if let Err(e) = self.write_request(&mut conn, &request).await {
            if !reused {
                return Err(PipelineError::BadGateway(e.to_string()));
            }
            debug!(
                target: "caxy::origin",
                origin = %pool_key,
                error = %e,
                "Write on pooled connection failed; reconnecting"
            );
            conn = self.connect(target).await?;
            self.write_request(&mut conn, &request)
                .await
                .map_err(|e| PipelineError::BadGateway(e.to_string()))?;
        }

        let (response, reusable) = read_origin_response(
            &mut conn.stream,
            &mut conn.read_buf,
            self.io_timeout,
            self.max_header_bytes,
            self.max_body_bytes,
        )
        .await
        .map_err(|e| PipelineError::BadGateway(e.to_string()))?;

        if reusable {
            self.checkin(&pool_key, conn);
        }

        Ok(response)
    }

    /// Take an idle connection from the pool or open a new one.
    async fn checkout(
        &self,
        pool_key: &str,
        target: &Target,
    ) -> Result<(PooledStream, bool), PipelineError> {
        if let Some(mut entry) = self.pools.get_mut(pool_key) {
            if let Some(pooled) = entry.pop() {
                debug!(target: "caxy::origin", origin = %pool_key, "Reusing pooled origin connection");
                return Ok((pooled, true));
            }
        }

        info!(target: "caxy::origin", origin = %pool_key, "Creating new origin connection");
        Ok((self.connect(target).await?, false))
    }

    /// Park a connection for reuse.
    fn checkin(&self, pool_key: &str, conn: PooledStream) {
        self.pools
            .entry(pool_key.to_string())
            .or_default()
            .push(conn);

        debug!(target: "caxy::origin", origin = %pool_key, "Returned origin connection to pool");
    }

    async fn connect(&self, target: &Target) -> Result<PooledStream, PipelineError> {
        let addr = format!("{}:{}", target.host, target.port);

        let stream = match timeout(self.io_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(PipelineError::BadGateway(format!(
                    "connect to {addr} failed: {e}"
                )))
            }
            Err(_) => {
                return Err(PipelineError::BadGateway(format!(
                    "connect to {addr} timed out"
                )))
            }
        };

        match target.scheme {
            Scheme::Http => Ok(PooledStream::new(Box::new(stream))),
            Scheme::Https => {
                let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
                    PipelineError::BadGateway(format!("invalid TLS server name: {e}"))
                })?;

                match timeout(self.io_timeout, self.tls.connect(server_name, stream)).await {
                    Ok(Ok(tls_stream)) => Ok(PooledStream::new(Box::new(tls_stream))),
                    Ok(Err(e)) => Err(PipelineError::BadGateway(format!(
                        "TLS handshake with {addr} failed: {e}"
                    ))),
                    Err(_) => Err(PipelineError::BadGateway(format!(
                        "TLS handshake with {addr} timed out"
                    ))),
                }
            }
        }
    }

    async fn write_request(&self, conn: &mut PooledStream, request: &[u8]) -> anyhow::Result<()> {
        match timeout(self.io_timeout, async {
            conn.stream.write_all(request).await?;
            conn.stream.flush().await
        })
        .await
        {
            Ok(res) => {
                res?;
                Ok(())
            }
            Err(_) => anyhow::bail!("origin write timed out"),
        }
    }
}

fn pool_key(target: &Target) -> String {
    let scheme = match target.scheme {
        Scheme::Http => "http",
        Scheme::Https => "https",
    };
    format!("{scheme}://{}:{}", target.host, target.port)
}

fn build_request(target: &Target) -> Vec<u8> {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Accept: */*\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        target.request_path,
        target.host_header()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use crate::target::normalize_target;

    use super::*;

    #[test]
    fn test_request_wire_format() {
        let target = normalize_target(Some("http://example.test/a/b?c=1")).unwrap();
        let wire = String::from_utf8(build_request(&target)).unwrap();

        assert!(wire.starts_with("GET /a/b?c=1 HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.test\r\n"));
        assert!(wire.contains("User-Agent: caxy/"));
        assert!(wire.contains("Accept: */*\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_pool_keys_separate_schemes_and_ports() {
        let plain = normalize_target(Some("http://example.test/a")).unwrap();
        let tls = normalize_target(Some("https://example.test/a")).unwrap();
        let alt = normalize_target(Some("http://example.test:8081/a")).unwrap();

        assert_eq!(pool_key(&plain), "http://example.test:80");
        assert_eq!(pool_key(&tls), "https://example.test:443");
        assert_eq!(pool_key(&alt), "http://example.test:8081");
    }
}
