//! Per-connection HTTP/1 handler.
//!
//! Reads one client request, routes it, and dispatches to the proxy
//! pipeline or one of the service endpoints. Every response closes the
//! connection.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::BytesMut;
use caxy_http::responses::{send_error_envelope, send_json, send_no_content};
use caxy_http::ClientStream;
use chrono::Utc;
use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::ServerState;

mod request;
mod routing;
mod timeouts;

use request::{query_param, read_http_request};
use routing::{route_for, Route};

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    port: u16,
    timestamp: String,
}

/// Entry point for a logical worker handling a single connection.
#[instrument(skip(stream, state), fields(client = %client_addr))]
pub(crate) async fn handle_connection(
    mut stream: Box<dyn ClientStream>,
    client_addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    debug!(target: "caxy::worker", "Handling new client connection");

    let mut buf = BytesMut::new();
    let idle_timeout = Duration::from_secs(state.cfg.client_read_timeout_secs);

    let Some(req) = read_http_request(&mut stream, &mut buf, &state.cfg, idle_timeout).await?
    else {
        return Ok(());
    };

    debug!(
        target: "caxy::worker",
        method = %req.method,
        path = %req.path,
        "Parsed HTTP request line"
    );

    match route_for(&req.method, &req.path) {
        Route::Preflight => send_no_content(&mut stream, true).await?,
        Route::Root => {
            let body = serde_json::to_vec(&RootResponse {
                message: "Proxy server is running",
                status: "ok",
            })?;
            send_json(&mut stream, 200, &body).await?;
        }
        Route::Status => {
            let status = if state.running.load(Ordering::SeqCst) {
                "Connected"
            } else {
                "Disconnected"
            };
            let body = serde_json::to_vec(&StatusResponse {
                status,
                port: state.cfg.port,
                timestamp: Utc::now().to_rfc3339(),
            })?;
            send_json(&mut stream, 200, &body).await?;
        }
        Route::Favicon => send_no_content(&mut stream, false).await?,
        Route::Proxy => {
            let raw_target = req
                .query
                .as_deref()
                .and_then(|query| query_param(query, "targetUrl"));
            serve_proxy(&mut stream, &state, raw_target.as_deref(), &client_addr).await?;
        }
        Route::NotFound => send_error_envelope(&mut stream, 404, "Not found").await?,
    }

    debug!(target: "caxy::worker", "Finished handling connection");
    Ok(())
}

/// Dispatch to the pipeline and map its failures onto the wire: envelope
/// while the response head is unsent, log-and-drop afterwards.
async fn serve_proxy(
    stream: &mut Box<dyn ClientStream>,
    state: &ServerState,
    raw_target: Option<&str>,
    client_addr: &SocketAddr,
) -> anyhow::Result<()> {
    match state.pipeline.serve(stream.as_mut(), raw_target).await {
        Ok(()) => Ok(()),
        Err(err) => match err.status_code() {
            Some(code) => {
                info!(
                    target: "caxy::worker",
                    client = %client_addr,
                    code,
                    error = %err,
                    "Proxy request failed before the response head"
                );
                send_error_envelope(stream.as_mut(), code, &err.to_string()).await
            }
            None => {
                warn!(
                    target: "caxy::worker",
                    client = %client_addr,
                    error = %err,
                    "Client write failed mid-response"
                );
                Ok(())
            }
        },
    }
}
