pub mod config;
pub mod duration;

pub use config::{ClusterConfig, ConfigError, DaemonConfig, RolloutConfig, ServerConfig};
pub use duration::parse_duration;
