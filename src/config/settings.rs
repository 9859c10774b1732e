//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::pagination::DEFAULT_PAGE_SIZE;
use crate::mcp::server::{LoggingOptions, PaginationOptions, ServerOptions, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::types::{Enabled, ListChangedCapability, LogLevel, ResourcesCapability, ServerCapabilities, ServerInfo};

/// Levels accepted for the process's own diagnostics.
const TRACING_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Identity advertised to clients.
    #[serde(default)]
    pub server: ServerConfig,

    /// Declared server capabilities.
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    /// List pagination.
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Server-initiated request settings.
    #[serde(default)]
    pub requests: RequestsConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.trim().is_empty() {
            return Err(invalid("server.name must not be empty".to_string()));
        }

        if self.pagination.page_size == 0 {
            return Err(invalid("pagination.page_size must be at least 1".to_string()));
        }

        if self.requests.timeout_secs == 0 {
            return Err(invalid("requests.timeout_secs must be at least 1".to_string()));
        }

        let level = self.logging.level.to_lowercase();
        if !TRACING_LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                TRACING_LEVELS.join(", ")
            )));
        }

        if let Some(ref client_default) = self.logging.client_default {
            if !self.capabilities.logging {
                return Err(invalid(
                    "logging.client_default requires the logging capability".to_string(),
                ));
            }
            client_default.parse::<LogLevel>().map_err(invalid)?;
        }

        Ok(())
    }

    /// The server identity described by the `server` section.
    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        let mut info = ServerInfo::new(self.server.name.clone(), self.server.version.clone());
        info.description.clone_from(&self.server.description);
        info
    }

    /// Engine options described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn server_options(&self) -> Result<ServerOptions, ConfigError> {
        self.validate()?;

        let logging = match self.logging.client_default {
            Some(ref level) => Some(LoggingOptions {
                default_level: level.parse().map_err(invalid)?,
            }),
            None => None,
        };

        Ok(ServerOptions {
            capabilities: self.capabilities.to_capabilities(),
            instructions: self.server.instructions.clone(),
            pagination: Some(PaginationOptions {
                page_size: self.pagination.page_size,
            }),
            logging,
            request_timeout: Duration::from_secs(self.requests.timeout_secs),
            ..ServerOptions::default()
        })
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError { message }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Programmatic server name.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Server version. Default: the crate version.
    #[serde(default = "default_server_version")]
    pub version: String,

    /// Short description.
    #[serde(default)]
    pub description: Option<String>,

    /// Usage hints returned from `initialize`.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            description: None,
            instructions: None,
        }
    }
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// A capability that may also announce list changes.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListChangedConfig {
    /// Emit `list_changed` notifications on registration.
    #[serde(default = "default_true")]
    pub list_changed: bool,
}

impl Default for ListChangedConfig {
    fn default() -> Self {
        Self { list_changed: true }
    }
}

/// Resource capability configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesConfig {
    /// Allow `resources/subscribe`.
    #[serde(default = "default_true")]
    pub subscribe: bool,

    /// Emit `resources/list_changed` on registration.
    #[serde(default = "default_true")]
    pub list_changed: bool,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            subscribe: true,
            list_changed: true,
        }
    }
}

/// Declared capabilities. `null` for a section disables it.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilitiesConfig {
    /// Tool support.
    #[serde(default = "some_default")]
    pub tools: Option<ListChangedConfig>,

    /// Prompt support.
    #[serde(default = "some_default")]
    pub prompts: Option<ListChangedConfig>,

    /// Resource support.
    #[serde(default = "some_default")]
    pub resources: Option<ResourcesConfig>,

    /// `logging/setLevel` support.
    #[serde(default = "default_true")]
    pub logging: bool,

    /// `completion/complete` support.
    #[serde(default = "default_true")]
    pub completions: bool,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            tools: Some(ListChangedConfig::default()),
            prompts: Some(ListChangedConfig::default()),
            resources: Some(ResourcesConfig::default()),
            logging: true,
            completions: true,
        }
    }
}

impl CapabilitiesConfig {
    /// The capability set to declare to clients.
    #[must_use]
    pub fn to_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: self.tools.map(|c| ListChangedCapability {
                list_changed: c.list_changed,
            }),
            prompts: self.prompts.map(|c| ListChangedCapability {
                list_changed: c.list_changed,
            }),
            resources: self.resources.map(|c| ResourcesCapability {
                subscribe: c.subscribe,
                list_changed: c.list_changed,
            }),
            logging: self.logging.then_some(Enabled {}),
            completions: self.completions.then_some(Enabled {}),
        }
    }
}

fn some_default<T: Default>() -> Option<T> {
    Some(T::default())
}

const fn default_true() -> bool {
    true
}

/// Pagination configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    /// Entries per list page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level for the process's own diagnostics (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Level applied to MCP clients that never call `logging/setLevel`
    /// (debug, info, notice, warning, error, critical, alert, emergency).
    #[serde(default)]
    pub client_default: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            client_default: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Server-initiated request configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestsConfig {
    /// Seconds to wait for a client to answer sampling, elicitation or roots requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.name, "mcp-engine");
        assert_eq!(config.pagination.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.requests.timeout_secs, 60);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": {
                "name": "demo",
                "version": "1.2.3",
                "description": "A demo server",
                "instructions": "Call echo first"
            },
            "capabilities": {
                "tools": { "list_changed": false },
                "prompts": null,
                "resources": { "subscribe": true, "list_changed": true },
                "logging": true,
                "completions": false
            },
            "pagination": { "page_size": 10 },
            "logging": { "level": "debug", "client_default": "warning" },
            "requests": { "timeout_secs": 5 }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());

        let info = config.server_info();
        assert_eq!(info.name, "demo");
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.description.as_deref(), Some("A demo server"));

        let options = config.server_options().unwrap();
        assert_eq!(options.capabilities.tools, Some(ListChangedCapability { list_changed: false }));
        assert!(options.capabilities.prompts.is_none());
        assert!(options.capabilities.logging.is_some());
        assert!(options.capabilities.completions.is_none());
        assert_eq!(options.pagination, Some(PaginationOptions { page_size: 10 }));
        assert_eq!(
            options.logging,
            Some(LoggingOptions {
                default_level: LogLevel::Warning
            })
        );
        assert_eq!(options.request_timeout, Duration::from_secs(5));
        assert_eq!(options.instructions.as_deref(), Some("Call echo first"));
    }

    #[test]
    fn capabilities_default_to_everything() {
        let caps = CapabilitiesConfig::default().to_capabilities();
        assert_eq!(caps.tools, Some(ListChangedCapability { list_changed: true }));
        assert_eq!(
            caps.resources,
            Some(ResourcesCapability {
                subscribe: true,
                list_changed: true
            })
        );
        assert!(caps.logging.is_some());
        assert!(caps.completions.is_some());
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
        assert!(config.client_default.is_none());
    }

    #[test]
    fn reject_zero_page_size() {
        let config: Config = serde_json::from_str(r#"{"pagination": {"page_size": 0}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_timeout() {
        let config: Config = serde_json::from_str(r#"{"requests": {"timeout_secs": 0}}"#).unwrap();
        assert!(config.server_options().is_err());
    }

    #[test]
    fn reject_invalid_levels() {
        let config: Config = serde_json::from_str(r#"{"logging": {"level": "loud"}}"#).unwrap();
        assert!(config.validate().is_err());

        let config: Config = serde_json::from_str(r#"{"logging": {"client_default": "verbose"}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_default_requires_logging_capability() {
        let json = r#"{
            "capabilities": { "logging": false },
            "logging": { "client_default": "info" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
