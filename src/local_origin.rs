use bytes::Bytes;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::cache::Cache;
use crate::error::ProxyError;
use crate::freshness::FreshnessPolicy;
use crate::request::{read_response, MessageLimits, Request};

/// Serves requests for the managed local origin, filling the cache on misses.
pub struct LocalOriginForwarder {
    cache: Arc<Cache>,
    freshness: Box<dyn FreshnessPolicy>,
    origin_addr: String,
    request_timeout: Duration,
    limits: MessageLimits,
}

impl LocalOriginForwarder {
    pub fn new(
        cache: Arc<Cache>,
        freshness: Box<dyn FreshnessPolicy>,
        origin_addr: String,
        request_timeout: Duration,
        limits: MessageLimits,
    ) -> Self {
        Self {
            cache,
            freshness,
            origin_addr,
            request_timeout,
            limits,
        }
    }

    /// Canonical cache key: the origin's URI for `path`, independent of the
    /// Host spelling the client used.
    pub fn cache_key(&self, path: &str) -> String {
        format!("http://{}{}", self.origin_addr, path)
    }

    /// Returns the complete response bytes for `request`, from cache when fresh.
    pub async fn forward(&self, mut request: Request, path: &str) -> Result<Bytes, ProxyError> {
        let key = self.cache_key(path);

        if self.cache.exists(&key).await {
            match self.cache.get(&key).await? {
                Some(payload) if self.freshness.is_fresh(&key, &payload) => {
                    self.cache.stats().record_hit();
                    info!("Cache hit for {}", key);
                    return Ok(payload);
                }
                Some(_) => info!("Cache entry for {} is stale, refetching", key),
                // evicted between exists and get
                None => debug!("Cache entry for {} vanished before read", key),
            }
        }
        self.cache.stats().record_miss();
        info!("Cache miss for {}, fetching from origin {}", key, self.origin_addr);

        self.rewrite(&mut request, path);
        let response = self.fetch(&request).await?;
        self.cache.put(&key, &response).await?;

        Ok(response)
    }

    fn rewrite(&self, request: &mut Request, path: &str) {
        request.target = path.to_string();
        request.set_header("Host", &self.origin_addr);
        request.set_header("Connection", "close");
        request.remove_header("Proxy-Connection");
    }

    async fn fetch(&self, request: &Request) -> Result<Bytes, ProxyError> {
        let mut upstream = match timeout(self.request_timeout, TcpStream::connect(&self.origin_addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProxyError::from_connect(e, &self.origin_addr)),
            Err(_) => {
                return Err(ProxyError::Timeout(format!("connecting to {}", self.origin_addr)));
            }
        };

        let exchange = async {
            upstream.write_all(&request.to_bytes()).await?;
            upstream.flush().await?;
            read_response(&mut upstream, self.limits).await
        };

        timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ProxyError::Timeout(format!("waiting for {}", self.origin_addr)))?
    }
}
