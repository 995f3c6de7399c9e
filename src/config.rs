use serde::{Deserialize, Serialize};
use std::path::Path;

use chat_gateway::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Frames buffered per connection before it is dropped as too slow
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            queue_capacity: default_queue_capacity(),
            instance_id: default_instance_id(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Redis URL, e.g., "redis://localhost:6379" or "redis://:password@host:6379"
    /// Without one the gateway runs on the in-process bus.
    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };

        // Environment variables take precedence over the file
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(capacity) = var("QUEUE_CAPACITY").and_then(|c| c.parse().ok()) {
            self.server.queue_capacity = capacity;
        }
        if let Some(url) = var("REDIS_URL").filter(|u| !u.is_empty()) {
            self.bus.redis_url = Some(url);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.queue_capacity == 0 {
            anyhow::bail!("server.queue_capacity must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(config.bus.redis_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_values() {
        let yaml = r#"
server:
  port: 9000
  queue_capacity: 16
bus:
  redis_url: "redis://localhost:6379"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.queue_capacity, 16);
        assert_eq!(config.bus.redis_url.as_deref(), Some("redis://localhost:6379"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = AppConfig::from_yaml("server:\n  port: 9000\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("PORT", "7000"),
            ("QUEUE_CAPACITY", "32"),
            ("REDIS_URL", "redis://cache:6379"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.queue_capacity, 32);
        assert_eq!(config.bus.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn test_unparsable_override_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = AppConfig::from_yaml("server:\n  queue_capacity: 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
