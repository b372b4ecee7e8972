use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProxyError;
use crate::request::Request;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

// Hop-by-hop headers that must not be forwarded upstream
const HOP_BY_HOP: &[&str] = &[
    "Proxy-Connection",
    "Proxy-Authorization",
    "Keep-Alive",
    "TE",
    "Trailers",
    "Upgrade",
];

/// One-shot forwarding of plain HTTP requests to arbitrary origins. Nothing is cached.
pub struct RemoteRelay {
    request_timeout: Duration,
}

impl RemoteRelay {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    /// Forwards `request` to `host:port` and streams the response back to `client`
    /// until the origin closes. Errors are returned only while nothing has been
    /// written to the client; later failures are logged and end the transfer.
    pub async fn forward<C>(&self, mut request: Request, host: &str, port: u16, client: &mut C) -> Result<u64, ProxyError>
    where
        C: AsyncWrite + Unpin,
    {
        let target = format!("{}:{}", host, port);
        let mut upstream = match timeout(self.request_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProxyError::BadGateway(format!("{}: {}", target, e))),
            Err(_) => return Err(ProxyError::Timeout(format!("connecting to {}", target))),
        };

        Self::prepare(&mut request);
        let send = async {
            upstream.write_all(&request.to_bytes()).await?;
            upstream.flush().await
        };
        match timeout(self.request_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ProxyError::BadGateway(format!("sending to {}: {}", target, e))),
            Err(_) => return Err(ProxyError::Timeout(format!("sending to {}", target))),
        }

        let transferred = self.stream_response(&mut upstream, client, &target).await?;
        info!("Relayed {} bytes from {}", transferred, target);
        Ok(transferred)
    }

    /// Origin-form target, no hop-by-hop headers, and no connection reuse.
    fn prepare(request: &mut Request) {
        request.target = request.origin_form();
        for name in HOP_BY_HOP {
            request.remove_header(name);
        }
        request.set_header("Connection", "close");
    }

    async fn stream_response<U, C>(&self, upstream: &mut U, client: &mut C, target: &str) -> Result<u64, ProxyError>
    where
        U: AsyncRead + Unpin,
        C: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            let n = match timeout(self.request_timeout, upstream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) if total == 0 => {
                    return Err(ProxyError::BadGateway(format!("reading from {}: {}", target, e)));
                }
                Err(_) if total == 0 => {
                    return Err(ProxyError::Timeout(format!("waiting for {}", target)));
                }
                Ok(Err(e)) => {
                    warn!("Upstream {} failed mid-response after {} bytes: {}", target, total, e);
                    break;
                }
                Err(_) => {
                    warn!("Upstream {} stalled mid-response after {} bytes", target, total);
                    break;
                }
            };
            if n == 0 {
                break;
            }

            if let Err(e) = client.write_all(&buf[..n]).await {
                warn!("Client went away while relaying from {}: {}", target, e);
                break;
            }
            total += n as u64;
        }

        if let Err(e) = client.flush().await {
            debug!("Error flushing relayed response from {}: {}", target, e);
        }
        Ok(total)
    }
}
