//! Opaque CONNECT tunnel. Payload bytes are copied, never inspected.

use log::{debug, info, warn};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::CONNECTION_ESTABLISHED;
use crate::error::ProxyError;

const TUNNEL_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

pub struct TunnelRelay {
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl TunnelRelay {
    pub fn new(connect_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            idle_timeout,
        }
    }

    /// Connects to `host:port`, acknowledges the CONNECT, then relays until either
    /// side closes. On connect failure nothing is written to `client`.
    pub async fn open<C>(&self, client: C, host: &str, port: u16) -> Result<TunnelStats, ProxyError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let target = format!("{}:{}", host, port);
        let upstream = match timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProxyError::BadGateway(format!("{}: {}", target, e))),
            Err(_) => return Err(ProxyError::Timeout(format!("connecting to {}", target))),
        };
        debug!("Tunnel upstream connected to {}", target);

        let mut client = client;
        client.write_all(CONNECTION_ESTABLISHED).await?;
        client.flush().await?;

        let stats = relay(client, upstream, self.idle_timeout).await;
        info!(
            "Tunnel to {} closed ({} bytes up, {} bytes down)",
            target, stats.client_to_upstream, stats.upstream_to_client
        );
        Ok(stats)
    }
}

/// Last time either direction moved bytes, as millis since the tunnel opened.
struct Activity {
    started: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// Copies bytes both ways until either side reaches end-of-stream or fails, or
/// neither side has moved data for `idle_timeout`. Both streams are dropped on return.
pub async fn relay<A, B>(client: A, upstream: B, idle_timeout: Duration) -> TunnelStats
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let activity = Activity::new();
    let up = AtomicU64::new(0);
    let down = AtomicU64::new(0);

    tokio::select! {
        result = pump(client_read, upstream_write, &activity, &up, idle_timeout) => {
            if let Err(e) = result {
                debug!("Tunnel client->upstream ended: {}", e);
            }
        }
        result = pump(upstream_read, client_write, &activity, &down, idle_timeout) => {
            if let Err(e) = result {
                debug!("Tunnel upstream->client ended: {}", e);
            }
        }
    }

    TunnelStats {
        client_to_upstream: up.load(Ordering::Relaxed),
        upstream_to_client: down.load(Ordering::Relaxed),
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W, activity: &Activity, transferred: &AtomicU64, idle_timeout: Duration) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; TUNNEL_BUFFER_SIZE];
    loop {
        let n = match timeout(idle_timeout, reader.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                // the other direction may still be busy
                if activity.idle_for() >= idle_timeout {
                    warn!("Tunnel idle for {:?}, closing", idle_timeout);
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel idle"));
                }
                continue;
            }
        };
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        activity.touch();
        transferred.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_copies_both_directions_and_stops_on_close() {
        let (client_side, mut client) = duplex(1024);
        let (upstream_side, mut upstream) = duplex(1024);

        let handle = tokio::spawn(relay(client_side, upstream_side, Duration::from_secs(5)));

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        upstream.write_all(b"world!").await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world!");

        // closing one side must end the relay even though the other stays open
        drop(upstream);
        let stats = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(stats.client_to_upstream, 5);
        assert_eq!(stats.upstream_to_client, 6);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_relay_closes_when_idle() {
        let (client_side, _client) = duplex(64);
        let (upstream_side, _upstream) = duplex(64);

        let stats = timeout(
            Duration::from_secs(2),
            relay(client_side, upstream_side, Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert_eq!(stats, TunnelStats::default());
    }
}
