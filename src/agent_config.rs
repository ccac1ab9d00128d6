use std::fs;
use std::path::Path;
use std::time::Duration;

use gethostname::gethostname;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfig {
    #[serde(rename = "controller_url")]
    pub controller_url: String,
    #[serde(rename = "username", default = "default_username")]
    pub username: String,
    #[serde(rename = "password", default)]
    pub password: String,
    #[serde(rename = "domain", default = "default_domain")]
    pub domain: String,
    #[serde(rename = "name", default = "default_name")]
    pub name: String,
    #[serde(rename = "description", default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub server_type: String,
    #[serde(rename = "capacity", default = "default_capacity")]
    pub capacity: u32,
    #[serde(rename = "auto_register", default = "default_true")]
    pub auto_register: bool,
    #[serde(rename = "heartbeat_interval_secs", default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(rename = "poll_backoff_secs", default = "default_poll_backoff")]
    pub poll_backoff_secs: u64,
    #[serde(rename = "connect_timeout_secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(rename = "request_timeout_secs", default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(rename = "log_level", default)]
    pub log_level: Option<String>,
    #[serde(rename = "jobs", default)]
    pub jobs: JobsConfig,
}

/// Settings for the bundled process handler.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobsConfig {
    #[serde(rename = "shell", default = "default_shell")]
    pub shell: String,
    #[serde(rename = "working_directory", default)]
    pub working_directory: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            shell: default_shell(),
            working_directory: None,
        }
    }
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_domain() -> String {
    "Global".to_string()
}

fn default_name() -> String {
    gethostname().to_string_lossy().into_owned()
}

fn default_capacity() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_poll_backoff() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_shell() -> String {
    "sh".to_string()
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<AgentConfig> {
        let path = path.as_ref();
        let config = fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&config)
    }

    pub fn parse(json: &str) -> Result<AgentConfig> {
        let config: AgentConfig = serde_json::from_str(json)
            .map_err(|e| AgentError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reports every problem at once rather than the first one found.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.controller_url.trim().is_empty() {
            errors.push("controller_url must be specified");
        }
        if self.name.trim().is_empty() {
            errors.push("name must be specified");
        }
        if self.server_type.trim().is_empty() {
            errors.push("type must be specified and registered with the controller beforehand");
        }
        if self.password.is_empty() {
            errors.push("password must be specified");
        }
        if self.capacity == 0 {
            errors.push("capacity must be at least 1");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Config(format!(
                "Fix the following in the config file:\n{}",
                errors.join("\n")
            )))
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_secs(self.poll_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applies_defaults() {
        let config = AgentConfig::parse(
            r#"{"controller_url": "http://localhost:9000", "password": "secret", "type": "Python", "name": "ces1"}"#,
        )
        .unwrap();

        assert_eq!(config.username, "admin");
        assert_eq!(config.domain, "Global");
        assert_eq!(config.capacity, 5);
        assert!(config.auto_register);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.poll_backoff(), Duration::from_secs(30));
        assert_eq!(config.jobs.shell, "sh");
        assert!(config.request_timeout_secs.is_none());
    }

    #[test]
    fn test_name_defaults_to_hostname() {
        let config = AgentConfig::parse(
            r#"{"controller_url": "http://localhost:9000", "password": "secret", "type": "Python"}"#,
        )
        .unwrap();

        assert_eq!(config.name, gethostname().to_string_lossy());
    }

    #[test]
    fn test_validate_lists_all_problems() {
        let err = AgentConfig::parse(r#"{"controller_url": "", "capacity": 0}"#).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("controller_url"));
        assert!(message.contains("type"));
        assert!(message.contains("password"));
        assert!(message.contains("capacity"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AgentConfig::load("/nonexistent/agent-config.json").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
