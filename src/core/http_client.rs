//! # HTTP Client Factory
//!
//! Builds the single `reqwest::Client` shared by every probe invocation so
//! that connection pooling works across the whole run.

use crate::config::Config;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// HTTP client configuration errors
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("Failed to build HTTP client: {0}")]
    BuildError(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// HTTP client pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 20,
            idle_timeout: Duration::from_secs(90),
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    /// Pool sized for a run holding `concurrency` requests in flight.
    pub fn for_concurrency(concurrency: usize) -> Self {
        Self {
            max_idle_per_host: concurrency.saturating_mul(2).max(1),
            ..Self::default()
        }
    }
}

/// HTTP client configuration
///
/// No total request timeout is set on the client; each probe applies its own
/// budget from dispatch to stream completion.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub pool: PoolConfig,
    pub compression: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            pool: PoolConfig::default(),
            compression: false,
        }
    }
}

impl From<&Config> for HttpClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            pool: PoolConfig::for_concurrency(config.concurrency),
            compression: config.compression,
        }
    }
}

/// HTTP client builder with configurable options
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    /// Create a new HTTP client builder with default configuration
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    /// Create HTTP client builder from application configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            config: HttpClientConfig::from(config),
        }
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Size the idle pool for the given concurrency
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.pool = PoolConfig::for_concurrency(concurrency);
        self
    }

    /// Set pool configuration
    pub fn pool_config(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Enable or disable transparent decompression
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    /// Build the HTTP client
    pub fn build(self) -> Result<Client, HttpClientError> {
        if self.config.connect_timeout.is_zero() {
            return Err(HttpClientError::InvalidConfig(
                "connect timeout must be greater than zero".to_string(),
            ));
        }

        let mut builder = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .pool_max_idle_per_host(self.config.pool.max_idle_per_host)
            .pool_idle_timeout(self.config.pool.idle_timeout)
            .tcp_nodelay(true);

        if let Some(keepalive) = self.config.pool.keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder = builder
            .gzip(self.config.compression)
            .brotli(self.config.compression);

        builder.build().map_err(HttpClientError::from)
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_builder() {
        let client = HttpClientBuilder::new().build().unwrap();
        assert!(client.get("http://127.0.0.1:9/stream").build().is_ok());
    }

    #[test]
    fn test_pool_sized_from_concurrency() {
        assert_eq!(PoolConfig::for_concurrency(8).max_idle_per_host, 16);
        assert_eq!(PoolConfig::for_concurrency(0).max_idle_per_host, 1);
    }

    #[test]
    fn test_client_from_config() {
        let mut config = Config::for_test();
        config.concurrency = 4;
        config.compression = true;
        let client_config = HttpClientConfig::from(&config);
        assert_eq!(client_config.pool.max_idle_per_host, 8);
        assert!(client_config.compression);
        assert!(HttpClientBuilder::from_config(&config).build().is_ok());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let result = HttpClientBuilder::new()
            .connect_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(HttpClientError::InvalidConfig(_))));
    }
}
