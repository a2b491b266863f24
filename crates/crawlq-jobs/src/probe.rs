//! Durable backend reachability checks.

use async_trait::async_trait;
use crawlq_config::{ProbeConfig, RedisConfig};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Attempts a TCP connection to `host:port` within `limit`.
///
/// Never fails: refusal, DNS errors and timeouts all report `false`. The
/// socket is dropped as soon as the connection succeeds.
pub async fn probe(host: &str, port: u16, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "Backend probe refused");
            false
        }
        Err(_) => {
            debug!(host, port, timeout_ms = limit.as_millis() as u64, "Backend probe timed out");
            false
        }
    }
}

/// Answers whether the durable backend is reachable right now.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Performs one check.
    async fn is_reachable(&self) -> bool;

    /// Human-readable target, for logs.
    fn target(&self) -> String;
}

/// TCP-level probe against a host and port.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Probe for the configured Redis server.
    pub fn for_redis(redis: &RedisConfig, probe: &ProbeConfig) -> Self {
        Self::new(redis.host.clone(), redis.port, probe.timeout())
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        probe(&self.host, self.port, self.timeout).await
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        assert!(!probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_target() {
        let probe = TcpProbe::for_redis(&RedisConfig::default(), &ProbeConfig::default());
        assert_eq!(probe.target(), "127.0.0.1:6379");
    }
}
