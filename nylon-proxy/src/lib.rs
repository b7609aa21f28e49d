pub mod health_checker;
pub mod load_balancer;
pub mod pipeline;
pub mod service;
pub mod static_files;

pub use load_balancer::UpstreamPool;
pub use service::{AppState, NylonProxy};
