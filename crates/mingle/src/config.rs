//! Node configuration.

use std::path::PathBuf;

use mingle_sync::SyncConfig;

use crate::error::{NodeError, Result};

/// Configuration for a [`Node`](crate::Node).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Human-readable name advertised in the node's own Peer record.
    pub name: String,
    /// Host to bind and advertise.
    pub host: String,
    /// Port to bind and advertise.
    pub port: u16,
    /// SQLite database path; `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    /// Transport and sync configuration.
    pub sync: SyncConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "mingle".into(),
            host: "127.0.0.1".into(),
            port: 1111,
            database: None,
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// The `host:port` this node advertises.
    pub fn connection(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Load from `MINGLE_NAME`, `MINGLE_HOST`, `MINGLE_PORT` and `MINGLE_DB`,
    /// falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(name) = lookup("MINGLE_NAME") {
            config.name = name;
        }
        if let Some(host) = lookup("MINGLE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("MINGLE_PORT") {
            config.port = port
                .parse()
                .map_err(|_| NodeError::Config(format!("MINGLE_PORT is not a port: {port:?}")))?;
        }
        if let Some(path) = lookup("MINGLE_DB").filter(|p| !p.is_empty()) {
            config.database = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}
