use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigRecordError {
    #[error("Host must not be empty")]
    EmptyHost,
    #[error("Invalid host [{0}]: expected a host name or address, optionally with a port")]
    InvalidHost(String),
    #[error("No inverter host configured. Set {env} or create {path}")]
    Missing { env: String, path: PathBuf },
    #[error("Cannot access config record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Cannot parse config record {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },
}

/// Setup data for one inverter: just its address on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    host: String,
}

impl ConfigRecord {
    pub fn new(host: impl AsRef<str>) -> Result<Self, ConfigRecordError> {
        let host = host.as_ref().trim();
        if host.is_empty() {
            return Err(ConfigRecordError::EmptyHost);
        }
        if host.contains("://") || host.contains('/') || host.chars().any(char::is_whitespace) {
            return Err(ConfigRecordError::InvalidHost(host.to_string()));
        }
        Ok(Self { host: host.to_string() })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Identifies the inverter; two records with the same unique id configure the same device.
    pub fn unique_id(&self) -> String {
        self.host.to_lowercase()
    }

    pub fn title(&self) -> &str {
        &self.host
    }

    pub fn load(path: &Path) -> Result<Option<Self>, ConfigRecordError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigRecordError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let record: ConfigRecord = serde_yml::from_str(&content).map_err(|source| ConfigRecordError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        // Re-validate whatever was written by hand.
        Self::new(record.host).map(Some)
    }

    pub fn store(&self, path: &Path) -> Result<(), ConfigRecordError> {
        let io_err = |source| ConfigRecordError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_yml::to_string(self).map_err(|source| ConfigRecordError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    /// Picks the record to run with: a host from the environment wins and is persisted,
    /// otherwise the previously stored record is used.
    pub fn resolve(env_host: Option<&str>, path: &Path, env: &str) -> Result<Self, ConfigRecordError> {
        if let Some(host) = env_host {
            let record = Self::new(host)?;
            match Self::load(path) {
                Ok(Some(stored)) if stored == record => {}
                Ok(Some(stored)) => {
                    log::info!("Replacing stored inverter [{}] with [{}]", stored.title(), record.title());
                    record.store(path)?;
                }
                Ok(None) | Err(_) => record.store(path)?,
            }
            return Ok(record);
        }

        Self::load(path)?.ok_or_else(|| ConfigRecordError::Missing {
            env: env.to_string(),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_addresses_and_names() {
        for host in ["192.168.1.50", "inverter.local", "inverter.local:8080", "  10.0.0.2  "] {
            let record = ConfigRecord::new(host).unwrap();
            assert_eq!(record.host(), host.trim());
        }
    }

    #[test]
    fn rejects_bad_hosts() {
        assert!(matches!(ConfigRecord::new(""), Err(ConfigRecordError::EmptyHost)));
        assert!(matches!(ConfigRecord::new("  "), Err(ConfigRecordError::EmptyHost)));
        assert!(matches!(ConfigRecord::new("http://inverter"), Err(ConfigRecordError::InvalidHost(_))));
        assert!(matches!(ConfigRecord::new("inverter/api"), Err(ConfigRecordError::InvalidHost(_))));
        assert!(matches!(ConfigRecord::new("my inverter"), Err(ConfigRecordError::InvalidHost(_))));
    }

    #[test]
    fn unique_id_ignores_case() {
        let record = ConfigRecord::new("Inverter.Local").unwrap();
        assert_eq!(record.unique_id(), "inverter.local");
        assert_eq!(record.title(), "Inverter.Local");
    }

    #[test]
    fn stores_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        assert_eq!(ConfigRecord::load(&path).unwrap(), None);

        let record = ConfigRecord::new("192.168.1.50").unwrap();
        record.store(&path).unwrap();

        assert_eq!(ConfigRecord::load(&path).unwrap(), Some(record));
    }

    #[test]
    fn environment_host_wins_and_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        ConfigRecord::new("10.0.0.1").unwrap().store(&path).unwrap();

        let record = ConfigRecord::resolve(Some("10.0.0.2"), &path, "KSTAR_HOST").unwrap();

        assert_eq!(record.host(), "10.0.0.2");
        assert_eq!(ConfigRecord::load(&path).unwrap(), Some(record));
    }

    #[test]
    fn falls_back_to_stored_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        ConfigRecord::new("10.0.0.1").unwrap().store(&path).unwrap();

        let record = ConfigRecord::resolve(None, &path, "KSTAR_HOST").unwrap();
        assert_eq!(record.host(), "10.0.0.1");
    }

    #[test]
    fn missing_everywhere_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigRecord::resolve(None, &dir.path().join(CONFIG_FILE), "KSTAR_HOST").unwrap_err();
        assert!(matches!(err, ConfigRecordError::Missing { .. }));
        assert!(err.to_string().contains("KSTAR_HOST"));
    }

    #[test]
    fn hand_edited_record_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "host: \"http://inverter\"\n").unwrap();
        assert!(matches!(ConfigRecord::load(&path), Err(ConfigRecordError::InvalidHost(_))));
    }
}
