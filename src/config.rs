//! Configuration: connection settings and table definitions, read from
//! TOML.
//!
//! ```toml
//! [connection]
//! host = "127.0.0.1"
//! port = 6379
//! cluster = false
//! timeout_ms = 2000
//!
//! [[tables]]
//! name = "order_item"
//! primary_key = ["order_id", "item_id"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RedluaError, RedluaResult};
use crate::table::Table;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub tables: Vec<TableConfig>,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Hash-tag key prefixes so every table lives in one slot.
    pub cluster: bool,
    /// Try `HELLO 3` after connecting.
    pub resp3: bool,
    /// Deadline per round trip; none when absent.
    pub timeout_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            cluster: false,
            resp3: true,
            timeout_ms: None,
        }
    }
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// One table definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Key prefix; the table name when absent.
    pub prefix: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: Vec<String>,
}

fn default_primary_key() -> Vec<String> {
    vec!["id".to_string()]
}

impl TableConfig {
    pub fn to_table(&self) -> Table {
        Table::new(self.prefix.as_deref().unwrap_or(&self.name)).with_primary_key(self.primary_key.iter().cloned())
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> RedluaResult<Self> {
        let config: Config = toml::from_str(text).map_err(|e| RedluaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file.
    pub fn load(path: &Path) -> RedluaResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RedluaError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// `<config dir>/redlua/config.toml`, e.g. `~/.config/redlua/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("redlua").join("config.toml"))
    }

    /// Load from [`Config::default_path`], or defaults when no file exists.
    pub fn load_default() -> RedluaResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// The named table, if configured.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.tables.iter().find(|t| t.name == name).map(TableConfig::to_table)
    }

    fn validate(&self) -> RedluaResult<()> {
        for table in &self.tables {
            if table.primary_key.is_empty() {
                return Err(RedluaError::Config(format!(
                    "table '{}' has an empty primary key",
                    table.name
                )));
            }
            if self.tables.iter().filter(|t| t.name == table.name).count() > 1 {
                return Err(RedluaError::Config(format!("table '{}' is defined twice", table.name)));
            }
        }
        Ok(())
    }
}
