//! Environment variable store - `env.json`

use super::{read_json, write_json_atomic};
use crate::error::Result;
use crate::registry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Flat name -> value mapping shared by all servers
#[derive(Debug)]
pub struct EnvStore {
    vars: BTreeMap<String, String>,
    path: PathBuf,
}

impl EnvStore {
    /// Load from `path`. A missing file is an empty store; nothing is written
    /// until the first `set`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let vars = match read_json(&path)? {
            Some(vars) => {
                info!("Loaded environment variables from {}", path.display());
                vars
            }
            None => {
                info!("No environment variables file found");
                BTreeMap::new()
            }
        };
        Ok(Self { vars, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite `name` and persist the whole mapping before returning
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value.to_string());
        write_json_atomic(&self.path, &vars)?;
        self.vars = vars;
        info!("Set environment variable {name}");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Required variables of `server` that are not set, in registry order.
    /// The flag is true when nothing is missing.
    pub fn check(&self, server: &str) -> Result<(bool, Vec<String>)> {
        let spec = registry::lookup(server)?;
        let missing: Vec<String> = spec
            .required_env
            .iter()
            .filter(|var| !self.vars.contains_key(**var))
            .map(|var| var.to_string())
            .collect();
        Ok((missing.is_empty(), missing))
    }
}
