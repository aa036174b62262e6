use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub delay: DelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FleetConfig {
    pub host: String,
    pub base_port: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            host: "127.0.0.1".to_string(),
            base_port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DelayConfig {
    pub default_secs: u64,
    pub max_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            default_secs: 20,
            max_secs: 20,
        }
    }
}

impl Config {
    /// Loads `mockfleet.toml` from the working directory. A missing file
    /// yields the default configuration; a present but malformed file is
    /// a startup error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("mockfleet.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.fleet.host, "127.0.0.1");
        assert_eq!(config.fleet.base_port, 8080);
        assert_eq!(config.delay.default_secs, 20);
        assert_eq!(config.delay.max_secs, 20);
    }

    #[test]
    fn partial_override() {
        let config: Config = toml::from_str(
            r#"
            [fleet]
            base_port = 8090

            [delay]
            default_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.fleet.base_port, 8090);
        assert_eq!(config.fleet.host, "127.0.0.1");
        assert_eq!(config.delay.default_secs, 0);
        assert_eq!(config.delay.max_secs, 20);
    }

    #[test]
    fn missing_file_is_default() {
        let config = Config::load_from(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(config.fleet.base_port, 8080);
    }

    #[test]
    fn malformed_file_errors() {
        let dir = std::env::temp_dir().join("mockfleet-config-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        fs::write(&path, "[fleet\nbase_port = oops").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
