mod app;
mod config;
mod datapool;
mod gossip;
mod metrics;
mod scenario;
mod transport;
mod validation;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use datapool::DatapoolError;
pub use gossip::GossipError;
pub use metrics::MetricsError;
pub use scenario::ScenarioError;
pub use transport::TransportError;
pub use validation::ValidationError;
