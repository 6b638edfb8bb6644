use serde::Deserialize;

mod validation;

pub use validation::{validate, ConfigReport};

// =======================================================
// PROXY CONFIG + DEFAULTS
// =======================================================
//
// Every field binds to an environment variable of the same name in upper
// case (PORT, CACHE_SIZE, MAX_ELEMENT_SIZE, REQUEST_TIMEOUT,
// CACHE_STATS_INTERVAL, DEBUG, ...). Unset variables keep the defaults
// below.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaxyConfig {
    /// Listen port.
    pub port: u16,
    /// Total cache capacity in bytes.
    pub cache_size: u64,
    /// Per-entry admission ceiling in bytes.
    pub max_element_size: u64,
    /// Idle timeout for origin fetches, milliseconds.
    pub request_timeout: u64,
    /// Period of the cache stats log emission, milliseconds. 0 disables it.
    pub cache_stats_interval: u64,
    /// Enables debug-level log emission for the caxy targets.
    pub debug: bool,

    // Connection handling limits
    /// Global cap on concurrent client connections.
    pub worker_connections: u16,
    /// Idle timeout while reading a client request head, seconds.
    pub client_read_timeout_secs: u64,

    // Wire limits (bytes)
    pub max_request_headers_bytes: u64,
    pub max_response_headers_bytes: u64,
    /// Cap on buffered origin bodies. 0 means unlimited: oversized bodies
    /// are still proxied, they are just never admitted to the cache.
    pub max_response_body_bytes: u64,
}

impl Default for CaxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cache_size: 200 * 1024 * 1024,
            max_element_size: 10 * 1024 * 1024,
            request_timeout: 30_000,
            cache_stats_interval: 60_000,
            debug: false,
            worker_connections: 1024,
            client_read_timeout_secs: 15,
            max_request_headers_bytes: 64 * 1024,
            max_response_headers_bytes: 64 * 1024,
            max_response_body_bytes: 0,
        }
    }
}

impl CaxyConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        built.try_deserialize()
    }

    /// Load from the environment, falling back to defaults when a variable
    /// does not parse or the resulting configuration is invalid.
    pub fn from_env_or_default() -> Self {
        match Self::from_env() {
            Ok(cfg) => {
                let report = cfg.validate();
                if report.has_errors() {
                    eprintln!("Invalid configuration from environment:");
                    eprint!("{}", report.format());
                    eprintln!("Continuing with default configuration...");
                    CaxyConfig::default()
                } else {
                    if !report.warnings().is_empty() {
                        eprintln!("Configuration warnings:");
                        eprint!("{}", report.format());
                    }
                    cfg
                }
            }
            Err(e) => {
                eprintln!("Error reading configuration from environment: {e}");
                eprintln!("Continuing with default configuration...");
                CaxyConfig::default()
            }
        }
    }

    /// Validate the configuration and return a report of warnings and errors.
    pub fn validate(&self) -> ConfigReport {
        validate(self)
    }
}
