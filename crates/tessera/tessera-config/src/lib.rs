mod config;

pub use config::{ChannelConfig, ConfigError};
