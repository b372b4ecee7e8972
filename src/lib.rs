pub mod cache;
pub mod classifier;
pub mod common;
pub mod config;
pub mod error;
pub mod freshness;
pub mod local_origin;
pub mod logging;
pub mod proxy;
pub mod relay;
pub mod request;
pub mod tunnel;

pub use cache::Cache;
pub use config::Config;
pub use error::ProxyError;
pub use proxy::ProxyServer;
