//! SNTP offset source backed by `rsntp`.
//!
//! The server name is resolved first so the local socket can be bound in the
//! same address family as the server.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use rsntp::AsyncSntpClient;
use tracing::debug;

use leetbot_core::constants::SNTP_TIMEOUT;
use leetbot_core::error::LeetError;

use crate::offset::OffsetSource;

const NTP_PORT: u16 = 123;

/// Unspecified local address matching the family of `server`.
pub fn bind_address_for(server: &SocketAddr) -> SocketAddr {
    match server {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// Queries one SNTP server.
#[derive(Debug, Clone)]
pub struct SntpSource {
    server: String,
    timeout: Duration,
}

impl SntpSource {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timeout: SNTP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port`, defaulting the port to 123.
    pub fn address(&self) -> String {
        let has_port = match self.server.rsplit_once(':') {
            Some((host, port)) => {
                port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
            }
            None => false,
        };
        if has_port {
            self.server.clone()
        } else {
            format!("{}:{}", self.server, NTP_PORT)
        }
    }

    fn query_error(&self, reason: impl ToString) -> LeetError {
        LeetError::TimeQuery {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, LeetError> {
        tokio::net::lookup_host(self.address())
            .await
            .map_err(|e| self.query_error(e))?
            .next()
            .ok_or_else(|| self.query_error("name resolved to no addresses"))
    }

    async fn synchronize(&self) -> Result<chrono::Duration, LeetError> {
        let server = self.resolve().await?;
        let mut client = AsyncSntpClient::new();
        client.set_bind_address(bind_address_for(&server));
        client.set_timeout(self.timeout);

        let target = server.to_string();
        let result = client
            .synchronize(target.as_str())
            .await
            .map_err(|e| self.query_error(e))?;

        let secs = result.clock_offset().as_secs_f64();
        let offset = chrono::Duration::nanoseconds((secs * 1e9).round() as i64);
        debug!(server = %self.server, %server, offset_ms = offset.num_milliseconds(), "SNTP reply");
        Ok(offset)
    }

    /// Resolve, query and compute the offset, all within the timeout.
    pub async fn query_offset(&self) -> Result<chrono::Duration, LeetError> {
        tokio::time::timeout(self.timeout, self.synchronize())
            .await
            .map_err(|_| LeetError::TimeQueryTimeout {
                server: self.server.clone(),
            })?
    }
}

impl OffsetSource for SntpSource {
    fn name(&self) -> &str {
        &self.server
    }

    fn query(&self) -> BoxFuture<'_, Result<chrono::Duration, LeetError>> {
        self.query_offset().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_appended() {
        assert_eq!(SntpSource::new("pool.ntp.org").address(), "pool.ntp.org:123");
        assert_eq!(SntpSource::new("10.0.0.1:1123").address(), "10.0.0.1:1123");
        assert_eq!(SntpSource::new("[::1]:123").address(), "[::1]:123");
        assert_eq!(SntpSource::new("[::1]").address(), "[::1]:123");
    }

    #[test]
    fn bind_address_follows_server_family() {
        let v4: SocketAddr = "10.0.0.1:123".parse().unwrap();
        let v6: SocketAddr = "[::1]:123".parse().unwrap();
        assert_eq!(bind_address_for(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(bind_address_for(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn ipv6_server_resolves_to_ipv6() {
        let source = SntpSource::new("[::1]");
        let addr = source.resolve().await.unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), NTP_PORT);
    }

    #[tokio::test]
    async fn silent_server_fails_within_timeout() {
        // Bound but never answers.
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let source =
            SntpSource::new(format!("127.0.0.1:{port}")).with_timeout(Duration::from_millis(200));

        let err = source.query_offset().await.unwrap_err();
        assert!(
            matches!(err, LeetError::TimeQueryTimeout { .. } | LeetError::TimeQuery { .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn unresolvable_name_fails() {
        let err = SntpSource::new("no-such-host.invalid")
            .with_timeout(Duration::from_millis(200))
            .query_offset()
            .await
            .unwrap_err();
        assert!(
            matches!(err, LeetError::TimeQuery { .. } | LeetError::TimeQueryTimeout { .. }),
            "{err}"
        );
    }
}
