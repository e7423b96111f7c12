use crate::config::SchedulerConfig;
use crate::Result;
use reqwest::Proxy;
use std::env;
use std::time::Duration;

/// Owner of the underlying HTTP client for one batch.
///
/// `reqwest` pools connections per host; the pool is sized to the batch's
/// connection cap so that idle connections beyond it are not kept around.
/// The number of simultaneously open connections is bounded by the
/// scheduler's concurrency cap, since every request runs inside a unit of work.
pub struct HttpTransport {
    client: reqwest::Client,
    connections: usize,
    ssl: bool,
}

impl HttpTransport {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let connections = config.connections.max(1);

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(connections)
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("RATEHTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )))
            .danger_accept_invalid_certs(!config.ssl);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        if let Ok(proxy_url) = env::var("RATEHTTP_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| crate::Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            connections,
            ssl: config.ssl,
        })
    }

    /// Handle to the pooled client. Clones share the pool.
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn verifies_tls(&self) -> bool {
        self.ssl
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_follows_config() {
        let config = SchedulerConfig::new().with_connections(3).with_ssl(false);
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.connections(), 3);
        assert!(!transport.verifies_tls());
    }

    #[test]
    fn test_transport_defaults_verify_tls() {
        let transport = HttpTransport::new(&SchedulerConfig::default()).unwrap();
        assert_eq!(transport.connections(), 5);
        assert!(transport.verifies_tls());
    }
}
