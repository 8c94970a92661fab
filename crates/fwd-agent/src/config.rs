//! Agent configuration.
//!
//! The optional YAML configuration file supplies defaults; command line
//! values override them. Startup data is a separate YAML file mapping
//! textual schema paths to node values:
//!
//! ```yaml
//! /interfaces/interface[eth0]:
//!   mtu: 9000
//!   enabled: true
//! /interfaces/interface[eth0]/ipv4:
//!   address:
//!     - ip: 10.0.0.1
//!       prefix-length: 24
//! ```

use fwd_translate::DataImage;
use fwd_types::{ParseError, SchemaPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid path {text:?} in {file}: {source}")]
    InvalidPath {
        file: PathBuf,
        text: String,
        #[source]
        source: ParseError,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentConfig {
    /// Per-call RPC timeout in milliseconds
    pub rpc_timeout_ms: u64,

    /// Directory holding one naming context file per domain
    pub context_dir: Option<PathBuf>,

    /// Write the naming contexts to `context_dir` after every commit
    pub persist_on_commit: bool,

    /// Data committed as the first transaction after startup
    pub startup_config: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 5000,
            context_dir: None,
            persist_on_commit: true,
            startup_config: None,
        }
    }
}

impl AgentConfig {
    /// Loads a configuration file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc-timeout-ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Directory to persist naming contexts to after each commit, if any.
    pub fn persist_dir(&self) -> Option<&Path> {
        match (&self.context_dir, self.persist_on_commit) {
            (Some(dir), true) => Some(dir.as_path()),
            _ => None,
        }
    }
}

/// Loads startup data into a data image.
///
/// An empty file is an empty image.
pub fn load_startup_data(path: &Path) -> Result<DataImage, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut image = DataImage::new();
    if text.trim().is_empty() {
        return Ok(image);
    }
    let nodes: BTreeMap<String, serde_json::Value> =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    for (text, value) in nodes {
        let node: SchemaPath = text.parse().map_err(|source| ConfigError::InvalidPath {
            file: path.to_path_buf(),
            text: text.clone(),
            source,
        })?;
        if node.is_wildcarded() {
            return Err(ConfigError::Invalid(format!("startup node {} is wildcarded", node)));
        }
        image.insert(node, value);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.rpc_timeout(), Duration::from_secs(5));
        assert!(config.persist_on_commit);
        assert_eq!(config.persist_dir(), None);
    }

    #[test]
    fn test_load_partial_file() {
        let f = file("rpc-timeout-ms: 250\ncontext-dir: /var/lib/fwdagent\n");
        let config = AgentConfig::load(f.path()).unwrap();
        assert_eq!(config.rpc_timeout_ms, 250);
        assert_eq!(config.persist_dir(), Some(Path::new("/var/lib/fwdagent")));
        assert_eq!(config.startup_config, None);
    }

    #[test]
    fn test_persistence_can_be_disabled() {
        let f = file("context-dir: /tmp/ctx\npersist-on-commit: false\n");
        let config = AgentConfig::load(f.path()).unwrap();
        assert_eq!(config.persist_dir(), None);
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let f = file("rpc-timeout-ms: 0\n");
        assert!(matches!(AgentConfig::load(f.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_yaml() {
        let f = file("rpc-timeout-ms: [1, 2\n");
        assert!(matches!(AgentConfig::load(f.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = AgentConfig::load(Path::new("/nonexistent/fwdagent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_startup_data() {
        let f = file(
            "/interfaces/interface[eth0]:\n  mtu: 9000\n/interfaces/interface[eth0]/ipv4:\n  address:\n    - ip: 10.0.0.1\n      prefix-length: 24\n",
        );
        let image = load_startup_data(f.path()).unwrap();

        let eth0: SchemaPath = "/interfaces/interface[eth0]".parse().unwrap();
        let ipv4: SchemaPath = "/interfaces/interface[eth0]/ipv4".parse().unwrap();
        assert_eq!(image.len(), 2);
        assert_eq!(image[&eth0], json!({"mtu": 9000}));
        assert_eq!(image[&ipv4], json!({"address": [{"ip": "10.0.0.1", "prefix-length": 24}]}));
    }

    #[test]
    fn test_empty_startup_data() {
        let f = file("");
        assert!(load_startup_data(f.path()).unwrap().is_empty());
    }

    #[test]
    fn test_startup_data_must_be_concrete() {
        let f = file("/interfaces/interface[*]:\n  mtu: 1500\n");
        assert!(matches!(load_startup_data(f.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_startup_data_with_bad_path() {
        let f = file("\"interfaces[eth0\": {}\n");
        assert!(matches!(load_startup_data(f.path()), Err(ConfigError::InvalidPath { .. })));
    }
}
