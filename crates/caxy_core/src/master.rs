use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use caxy_cache::CacheStore;
use caxy_config::CaxyConfig;
use caxy_pipeline::Pipeline;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, instrument};

use crate::worker::handle_connection;
use crate::ServerState;

/// Owns the listening socket and the shared server state, accepts client
/// connections, and spawns one worker task per connection.
pub struct Master {
    state: Arc<ServerState>,
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

/// Handle used to stop a running master from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Master {
    /// Bind the listener and build the shared state. The cache is created
    /// here, once, and handed by reference to the pipeline.
    pub async fn bind(cfg: CaxyConfig) -> anyhow::Result<Self> {
        let addr = format!("0.0.0.0:{}", cfg.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(target: "caxy::master", listen = %addr, "Bind() successful");

        let cache = Arc::new(CacheStore::new(
            cfg.cache_size as usize,
            cfg.max_element_size as usize,
        ));
        let pipeline = Pipeline::new(cache.clone(), &cfg);
        let max_conns = cfg.worker_connections as usize;

        Ok(Self {
            state: Arc::new(ServerState {
                cfg,
                cache,
                pipeline,
                running: AtomicBool::new(false),
            }),
            listener,
            semaphore: Arc::new(Semaphore::new(max_conns)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Address actually bound; with port 0 this is where the ephemeral port
    /// shows up.
    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Accept loop. Runs until a shutdown request, then drains in-flight
    /// connections before returning.
    #[instrument(skip(self), fields(
        port = self.state.cfg.port,
        worker_connections = self.state.cfg.worker_connections,
    ))]
    pub async fn run(self) -> anyhow::Result<()> {
        info!(target: "caxy::master", "Starting caxy master");
        self.state.running.store(true, Ordering::SeqCst);
        self.spawn_stats_reporter();

        let max_conns = self.state.cfg.worker_connections as u32;
        info!(
            target: "caxy::master",
            max_conns,
            "Global connection semaphore initialized; ready to accept"
        );

        loop {
            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                _ = self.shutdown.notified() => break,
            };

            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(target: "caxy::master", error = ?e, "Failed to accept connection");
                    continue;
                }
            };

            // Permits must be acquired via acquire_owned so they can move
            // into the worker task.
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(target: "caxy::master", error = ?e, "Failed to acquire connection permit");
                    break;
                }
            };

            debug!(
                target: "caxy::master",
                client_addr = %addr,
                in_flight = max_conns as usize - self.semaphore.available_permits(),
                "New connection accepted"
            );

            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(Box::new(stream), addr, state).await {
                    error!(
                        target: "caxy::worker",
                        client_addr = %addr,
                        error = ?e,
                        "Error while handling connection"
                    );
                }
                drop(permit);
            });
        }

        // Stop advertising, then drain: every permit comes back once its
        // worker finishes.
        self.state.running.store(false, Ordering::SeqCst);
        info!(target: "caxy::master", "Shutdown requested; draining in-flight connections");
        let _ = self.semaphore.acquire_many(max_conns).await;
        info!(target: "caxy::master", "Drained; master stopped");

        Ok(())
    }

    /// Periodic cache stats snapshot, emitted through the log layer only.
    fn spawn_stats_reporter(&self) {
        let interval_ms = self.state.cfg.cache_stats_interval;
        if interval_ms == 0 {
            return;
        }

        let cache = self.state.cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let stats = cache.stats();
                info!(
                    target: "caxy::cache",
                    current_bytes = stats.current_bytes,
                    items = stats.item_count,
                    hits = stats.hits,
                    misses = stats.misses,
                    hit_rate = stats.hit_rate(),
                    "Cache stats snapshot"
                );
            }
        });
    }
}
