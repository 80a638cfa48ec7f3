//! Application configuration loaded from environment variables.

use service::BusSettings;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable, one event per line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `ALLOCATED_CHANNEL`: channel for `Allocated` events (default: `"line_allocated"`)
/// - `OUT_OF_STOCK_RECIPIENT`: who hears about shortages (default: `"stock@made.com"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub allocated_channel: String,
    pub out_of_stock_recipient: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `var`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let bus = BusSettings::default();

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: var("LOG_FORMAT")
                .and_then(|f| LogFormat::parse(&f))
                .unwrap_or_default(),
            database_url: var("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            allocated_channel: var("ALLOCATED_CHANNEL").unwrap_or(bus.allocated_channel),
            out_of_stock_recipient: var("OUT_OF_STOCK_RECIPIENT")
                .unwrap_or(bus.out_of_stock_recipient),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the event handler destinations.
    pub fn bus_settings(&self) -> BusSettings {
        BusSettings {
            allocated_channel: self.allocated_channel.clone(),
            out_of_stock_recipient: self.out_of_stock_recipient.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let bus = BusSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 5,
            allocated_channel: bus.allocated_channel,
            out_of_stock_recipient: bus.out_of_stock_recipient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.allocated_channel, "line_allocated");
        assert_eq!(config.out_of_stock_recipient, "stock@made.com");
    }

    #[test]
    fn test_reads_variables() {
        let config = from_map(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/allocation"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("ALLOCATED_CHANNEL", "allocations"),
        ]);

        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/allocation")
        );
        assert_eq!(config.database_max_connections, 12);
        assert_eq!(config.bus_settings().allocated_channel, "allocations");
        assert_eq!(config.bus_settings().out_of_stock_recipient, "stock@made.com");
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = from_map(&[
            ("PORT", "not-a-port"),
            ("LOG_FORMAT", "xml"),
            ("DATABASE_URL", ""),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
