//! Request classification and local-origin request validation.

use http::{Method, StatusCode};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::common::ResponseBuilder;
use crate::config::Config;
use crate::error::ProxyError;
use crate::request::Request;

static SIZE_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/([0-9]+)$").expect("valid regex"));

/// Where a request is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Served by the managed origin through the cache. `path` is `/<size>`.
    LocalOrigin { path: String, size: u64 },
    Tunnel { host: String, port: u16 },
    Remote { host: String, port: u16 },
}

/// Why a request was refused before any upstream was contacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Malformed(String),
    MethodNotAllowed(Method),
    UriTooLong(u64),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Malformed(_) => StatusCode::BAD_REQUEST,
            Rejection::MethodNotAllowed(_) => StatusCode::NOT_IMPLEMENTED,
            Rejection::UriTooLong(_) => StatusCode::URI_TOO_LONG,
        }
    }

    pub fn status_line(&self) -> String {
        ResponseBuilder::status_line(self.status())
    }

    pub fn reason(&self) -> String {
        ProxyError::from(self.clone()).reason()
    }
}

impl From<Rejection> for ProxyError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Malformed(detail) => ProxyError::MalformedRequest(detail),
            Rejection::MethodNotAllowed(method) => ProxyError::MethodNotAllowed(method.to_string()),
            Rejection::UriTooLong(size) => ProxyError::UriTooLong(size),
        }
    }
}

/// Outcome of validating a local-origin request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid { size: u64 },
    Invalid(Rejection),
}

pub struct Classifier {
    local_hostnames: Vec<String>,
    uri_size_limit: u64,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        let mut local_hostnames: Vec<String> = config
            .local_origin_hostnames
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        local_hostnames.push(config.local_origin_host().to_ascii_lowercase());

        Self {
            local_hostnames,
            uri_size_limit: config.uri_size_limit,
        }
    }

    pub fn classify(&self, request: &Request) -> Result<Route, Rejection> {
        let host_header = request
            .header("host")
            .ok_or_else(|| Rejection::Malformed("missing Host header".to_string()))?;
        let (host, _) = split_host_port(host_header)
            .ok_or_else(|| Rejection::Malformed(format!("invalid Host header: {}", host_header)))?;

        if self.is_local_host(&host) {
            let path = request.origin_form();
            return match self.validate(&request.method, &path) {
                Validation::Valid { size } => Ok(Route::LocalOrigin { path, size }),
                Validation::Invalid(rejection) => Err(rejection),
            };
        }

        if request.method == Method::CONNECT {
            let (host, port) = split_host_port(&request.target)
                .ok_or_else(|| Rejection::Malformed(format!("invalid CONNECT target: {}", request.target)))?;
            return Ok(Route::Tunnel {
                host,
                port: port.unwrap_or(443),
            });
        }

        if let Some(url) = request.absolute_uri() {
            let host = url
                .host_str()
                .ok_or_else(|| Rejection::Malformed(format!("no host in {}", request.target)))?;
            return Ok(Route::Remote {
                host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port: url.port_or_known_default().unwrap_or(80),
            });
        }

        let (host, port) = split_host_port(host_header)
            .ok_or_else(|| Rejection::Malformed(format!("invalid Host header: {}", host_header)))?;
        Ok(Route::Remote {
            host,
            port: port.unwrap_or(80),
        })
    }

    /// Local-origin requests must be `GET /<decimal size>` with size below the limit.
    pub fn validate(&self, method: &Method, path: &str) -> Validation {
        if *method != Method::GET {
            return Validation::Invalid(Rejection::MethodNotAllowed(method.clone()));
        }

        let digits = match SIZE_PATH.captures(path).and_then(|c| c.get(1)) {
            Some(m) => m.as_str(),
            None => return Validation::Invalid(Rejection::Malformed(format!("invalid URI: {}", path))),
        };

        match digits.parse::<u64>() {
            Ok(size) if size < self.uri_size_limit => Validation::Valid { size },
            Ok(size) => Validation::Invalid(Rejection::UriTooLong(size)),
            // only overflow can fail here
            Err(_) => Validation::Invalid(Rejection::UriTooLong(u64::MAX)),
        }
    }

    pub fn validate_request_line(&self, line: &str) -> Validation {
        match Request::parse_request_line(line) {
            Ok((method, target, _)) => {
                let path = match url::Url::parse(&target) {
                    Ok(url) if target.contains("://") => url.path().to_string(),
                    _ => target,
                };
                self.validate(&method, &path)
            }
            Err(e) => Validation::Invalid(Rejection::Malformed(e.to_string())),
        }
    }

    pub fn is_local_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if let Ok(ip) = host.parse::<IpAddr>() {
            if ip.is_loopback() {
                return true;
            }
        }
        self.local_hostnames.iter().any(|h| *h == host)
    }
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals. Host is returned unbracketed.
pub fn split_host_port(authority: &str) -> Option<(String, Option<u16>)> {
    let authority = authority.trim();
    if authority.is_empty() {
        return None;
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(port.parse().ok()?),
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        // a bare IPv6 literal has more than one colon and no port
        Some((host, _)) if host.contains(':') => Some((authority.to_string(), None)),
        Some((host, port)) if !host.is_empty() => Some((host.to_string(), Some(port.parse().ok()?))),
        Some(_) => None,
        None => Some((authority.to_string(), None)),
    }
}
