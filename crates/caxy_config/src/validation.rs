use crate::CaxyConfig;

/// Validation output for a loaded caxy configuration.
#[derive(Debug, Default)]
pub struct ConfigReport {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConfigReport {
    /// Returns true when no errors were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true when at least one error was found.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the collected warning messages.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns the collected error messages.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Render warnings and errors into a readable, multi-line string.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
            for err in &self.errors {
                out.push_str("  - ");
                out.push_str(err);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Warnings:\n");
            for warn in &self.warnings {
                out.push_str("  - ");
                out.push_str(warn);
                out.push('\n');
            }
        }
        out
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Validate a caxy configuration and return a report of issues.
pub fn validate(cfg: &CaxyConfig) -> ConfigReport {
    let mut report = ConfigReport::default();

    if cfg.cache_size == 0 {
        report.error("cache_size is 0; the cache cannot hold any entry");
    }

    if cfg.max_element_size == 0 {
        report.warn("max_element_size is 0; every response will be refused admission");
    }

    // Admission ceiling above total capacity would let add() drain the whole
    // cache and still fail.
    if cfg.max_element_size > cfg.cache_size {
        report.error(format!(
            "max_element_size ({}) exceeds cache_size ({})",
            cfg.max_element_size, cfg.cache_size
        ));
    }

    if cfg.request_timeout == 0 {
        report.warn("request_timeout is 0; origin fetches will fail immediately");
    }

    if cfg.cache_stats_interval == 0 {
        report.warn("cache_stats_interval is 0; periodic cache stats are disabled");
    }

    if cfg.worker_connections == 0 {
        report.error("worker_connections is 0; no client connection can be accepted");
    }

    if cfg.max_request_headers_bytes == 0 || cfg.max_response_headers_bytes == 0 {
        report.warn("a header size limit is 0; header reads are unbounded");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_above_capacity_is_an_error() {
        let cfg = CaxyConfig {
            cache_size: 1024,
            max_element_size: 2048,
            ..CaxyConfig::default()
        };
        let report = validate(&cfg);
        assert!(report.has_errors());
        assert!(report.format().contains("max_element_size"));
    }

    #[test]
    fn test_zero_cache_size_is_an_error() {
        let cfg = CaxyConfig {
            cache_size: 0,
            max_element_size: 0,
            ..CaxyConfig::default()
        };
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn test_degenerate_timeouts_only_warn() {
        let cfg = CaxyConfig {
            request_timeout: 0,
            cache_stats_interval: 0,
            ..CaxyConfig::default()
        };
        let report = validate(&cfg);
        assert!(report.is_ok());
        assert_eq!(report.warnings().len(), 2);
    }
}
