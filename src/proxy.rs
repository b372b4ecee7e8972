//! Listener and per-connection lifecycle.
//!
//! Each accepted connection runs in its own task: read one request, classify
//! it, then hand it to the local-origin forwarder, the remote relay, or the
//! tunnel relay. Admission is bounded by a semaphore; when every permit is
//! taken the listener stops accepting and the OS backlog absorbs the rest.
//!
//! Shutdown stops new accepts only. Handlers already running are never
//! cancelled; `run` returns once all of them have finished.

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cache::Cache;
use crate::classifier::{Classifier, Route};
use crate::config::Config;
use crate::error::ProxyError;
use crate::local_origin::LocalOriginForwarder;
use crate::relay::RemoteRelay;
use crate::request::{read_request, MessageLimits};
use crate::tunnel::TunnelRelay;

/// Shared, read-only handler state. The cache is the only mutable piece and it
/// serializes itself.
struct ProxyState {
    classifier: Classifier,
    forwarder: LocalOriginForwarder,
    relay: RemoteRelay,
    tunnel: TunnelRelay,
    request_timeout: Duration,
    limits: MessageLimits,
}

pub struct ProxyServer {
    listener: TcpListener,
    state: Arc<ProxyState>,
    admission: Arc<Semaphore>,
}

impl ProxyServer {
    /// Binds the listening socket with address reuse enabled.
    pub async fn bind(config: &Config, cache: Arc<Cache>) -> Result<Self, ProxyError> {
        config.validate()?;

        let socket = if config.listen_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.listen_addr)?;
        let listener = socket.listen(config.listen_backlog)?;

        let state = ProxyState {
            classifier: Classifier::new(config),
            forwarder: LocalOriginForwarder::new(
                cache,
                config.freshness.build(),
                config.local_origin_addr.clone(),
                config.request_timeout(),
                config.message_limits(),
            ),
            relay: RemoteRelay::new(config.request_timeout()),
            tunnel: TunnelRelay::new(config.request_timeout(), config.tunnel_idle_timeout()),
            request_timeout: config.request_timeout(),
            limits: config.message_limits(),
        };

        info!("Proxy server listening on {}", listener.local_addr()?);
        debug!(
            "Local origin {}, max connections {}, request timeout {}s",
            config.local_origin_addr, config.max_connections, config.request_timeout_secs
        );

        Ok(Self {
            listener,
            state: Arc::new(state),
            admission: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` is cancelled, then waits for every
    /// in-flight handler to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ProxyError> {
        let tracker = TaskTracker::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.admission.clone().acquire_owned() => permit
                    .map_err(|e| ProxyError::Config(format!("admission semaphore closed: {}", e)))?,
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        // usually descriptor exhaustion; give handlers a moment to release some
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };

            debug!("Connection received from {}", peer);
            let state = self.state.clone();
            tracker.spawn(async move {
                let _permit = permit;
                state.handle_connection(stream, peer).await;
            });
        }

        tracker.close();
        info!("Stopped accepting; draining {} in-flight connection(s)", tracker.len());
        tracker.wait().await;
        info!("All connections drained");
        Ok(())
    }
}

impl ProxyState {
    /// Owns the client socket for the whole connection; it is shut down and
    /// dropped exactly once here, whatever the outcome.
    async fn handle_connection(&self, mut client: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.serve(&mut client, peer).await {
            match &e {
                ProxyError::MalformedRequest(_) | ProxyError::MethodNotAllowed(_) | ProxyError::UriTooLong(_) => {
                    info!("Rejected request from {}: {}", peer, e)
                }
                _ => warn!("Error handling request from {}: {}", peer, e),
            }
            if let Err(write_err) = client.write_all(&e.to_response()).await {
                debug!("Could not send error response to {}: {}", peer, write_err);
            }
        }

        if let Err(e) = client.shutdown().await {
            debug!("Error closing connection to {}: {}", peer, e);
        }
    }

    async fn serve(&self, client: &mut TcpStream, peer: SocketAddr) -> Result<(), ProxyError> {
        let request = match timeout(self.request_timeout, read_request(client, self.limits)).await {
            Ok(result) => match result? {
                Some(request) => request,
                None => {
                    debug!("{} closed without sending a request", peer);
                    return Ok(());
                }
            },
            Err(_) => return Err(ProxyError::RequestTimeout(format!("no request from {}", peer))),
        };

        let route = self.classifier.classify(&request)?;
        info!("{} {} {} -> {:?}", peer, request.method, request.target, route);

        match route {
            Route::LocalOrigin { path, .. } => {
                let response = self.forwarder.forward(request, &path).await?;
                client.write_all(&response).await?;
            }
            Route::Remote { host, port } => {
                self.relay.forward(request, &host, port, client).await?;
            }
            Route::Tunnel { host, port } => {
                self.tunnel.open(&mut *client, &host, port).await?;
            }
        }

        Ok(())
    }
}
