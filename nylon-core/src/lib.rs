pub mod config;
pub mod error;
pub mod plugin_def;
pub mod route;
pub mod router;
pub mod service;
pub mod session;
pub mod template;
pub mod tls;
pub mod upstream;

pub use config::{ProxyConfig, RuntimeConfig};
pub use error::NylonError;
pub use route::Route;
pub use router::Router;
pub use service::Service;
