//! Server configuration store - `config.json`

use super::{read_json, write_json_atomic};
use crate::command::Method;
use crate::error::{ManagerError, Result};
use crate::registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Persisted settings for one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_method")]
    pub method: Method,
}

fn default_method() -> Method {
    Method::Docker
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigData {
    #[serde(default)]
    servers: BTreeMap<String, ServerEntry>,
}

impl ConfigData {
    /// Every registered server, disabled, with its default method
    fn defaults() -> Self {
        let servers = registry::all()
            .iter()
            .map(|spec| {
                (
                    spec.name.to_string(),
                    ServerEntry {
                        enabled: false,
                        method: spec.default_method,
                    },
                )
            })
            .collect();
        Self { servers }
    }
}

/// Durable mapping of server name to enabled flag and launch method
#[derive(Debug)]
pub struct ConfigStore {
    data: ConfigData,
    path: PathBuf,
}

impl ConfigStore {
    /// Load from `path`, creating a default file on first run.
    ///
    /// Malformed content is reported as `ConfigCorrupt` and left untouched.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match read_json::<ConfigData>(&path)? {
            Some(data) => {
                info!("Loaded configuration from {}", path.display());
                Ok(Self { data, path })
            }
            None => {
                let store = Self {
                    data: ConfigData::defaults(),
                    path,
                };
                store.save()?;
                info!("Created default configuration at {}", store.path.display());
                Ok(store)
            }
        }
    }

    /// Rewrite the whole file
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, name: &str) -> Option<&ServerEntry> {
        self.data.servers.get(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.entry(name).map(|e| e.enabled).unwrap_or(false)
    }

    /// Enable `name` with `method`, creating the entry if needed
    pub fn enable(&mut self, name: &str, method: Method) -> Result<()> {
        registry::lookup(name)?;
        self.commit(
            name,
            ServerEntry {
                enabled: true,
                method,
            },
        )?;
        info!("Enabled {name} with method {method}");
        Ok(())
    }

    /// Mark `name` disabled. Stopping a running instance is the supervisor's job.
    pub fn disable(&mut self, name: &str) -> Result<()> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ManagerError::ServerNotConfigured(name.to_string()))?;
        let entry = ServerEntry {
            enabled: false,
            ..entry.clone()
        };
        self.commit(name, entry)?;
        info!("Disabled {name}");
        Ok(())
    }

    /// Write the mapping with `entry` in place, then adopt it. Memory only
    /// changes once the file does.
    fn commit(&mut self, name: &str, entry: ServerEntry) -> Result<()> {
        let mut servers = self.data.servers.clone();
        servers.insert(name.to_string(), entry);
        let data = ConfigData { servers };
        write_json_atomic(&self.path, &data)?;
        self.data = data;
        Ok(())
    }
}
