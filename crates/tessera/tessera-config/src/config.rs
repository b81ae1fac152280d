use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Names and limits shared by both ends of a channel pair.
///
/// Both processes must load the same values; the side that creates the
/// objects (the sim host) and the side that attaches (the learner) only
/// agree through these names.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    #[serde(default = "defaults::arena_name")]
    pub arena_name: String,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    /// Posted by the sim host when an observation is ready.
    #[serde(default = "defaults::ready_semaphore")]
    pub ready_semaphore: String,
    /// Posted by the learner once its action is in the arena.
    #[serde(default = "defaults::free_semaphore")]
    pub free_semaphore: String,
    #[serde(default = "defaults::observation_key")]
    pub observation_key: String,
    #[serde(default = "defaults::action_key")]
    pub action_key: String,
    #[serde(default = "defaults::steps")]
    pub steps: u64,
    #[serde(default = "defaults::attach_timeout_ms")]
    pub attach_timeout_ms: u64,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

mod defaults {
    pub fn arena_name() -> String {
        "/tessera_arena".into()
    }

    pub fn capacity() -> usize {
        1 << 16 // 65536
    }

    pub fn ready_semaphore() -> String {
        "/tessera_ready".into()
    }

    pub fn free_semaphore() -> String {
        "/tessera_free".into()
    }

    pub fn observation_key() -> String {
        "obs".into()
    }

    pub fn action_key() -> String {
        "action".into()
    }

    pub fn steps() -> u64 {
        100
    }

    pub fn attach_timeout_ms() -> u64 {
        5_000
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            arena_name: defaults::arena_name(),
            capacity: defaults::capacity(),
            ready_semaphore: defaults::ready_semaphore(),
            free_semaphore: defaults::free_semaphore(),
            observation_key: defaults::observation_key(),
            action_key: defaults::action_key(),
            steps: defaults::steps(),
            attach_timeout_ms: defaults::attach_timeout_ms(),
            log_level: defaults::log_level(),
        }
    }
}

impl ChannelConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ChannelConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        for (field, value) in [
            ("arena_name", &self.arena_name),
            ("ready_semaphore", &self.ready_semaphore),
            ("free_semaphore", &self.free_semaphore),
            ("observation_key", &self.observation_key),
            ("action_key", &self.action_key),
        ] {
            if value.trim_start_matches('/').is_empty() {
                return invalid(field, "must not be empty");
            }
        }
        if self.ready_semaphore == self.free_semaphore {
            return invalid("free_semaphore", "must differ from ready_semaphore");
        }
        if self.observation_key == self.action_key {
            return invalid("action_key", "must differ from observation_key");
        }
        if self.capacity < 8 * 1024 {
            return invalid("capacity", "must be at least 8192 bytes");
        }
        Ok(())
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ChannelConfig::parse("").unwrap();
        assert_eq!(config, ChannelConfig::default());
        assert_eq!(config.capacity, 65536);
        assert_eq!(config.attach_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn fields_override_defaults() {
        let config = ChannelConfig::parse(
            r#"
            arena_name = "/cartpole_arena"
            capacity = 131072
            steps = 10
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.arena_name, "/cartpole_arena");
        assert_eq!(config.capacity, 131072);
        assert_eq!(config.steps, 10);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.observation_key, "obs");
    }

    #[test]
    fn rejects_shared_semaphore_names() {
        let err = ChannelConfig::parse(
            r#"
            ready_semaphore = "/same"
            free_semaphore = "/same"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "free_semaphore",
                ..
            }
        ));
    }

    #[test]
    fn rejects_tiny_capacity_and_blank_names() {
        assert!(matches!(
            ChannelConfig::parse("capacity = 100"),
            Err(ConfigError::Invalid {
                field: "capacity",
                ..
            })
        ));
        assert!(matches!(
            ChannelConfig::parse(r#"arena_name = "/""#),
            Err(ConfigError::Invalid {
                field: "arena_name",
                ..
            })
        ));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            ChannelConfig::parse("capacity = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ChannelConfig::load("/nonexistent/tessera.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
