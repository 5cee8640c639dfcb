//! Build environment directories.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{ConfigError, ConfigResult};

pub const BUILD_DIR_VAR: &str = "CHARM_BUILD_DIR";
pub const LAYERS_DIR_VAR: &str = "CHARM_LAYERS_DIR";
pub const INTERFACES_DIR_VAR: &str = "CHARM_INTERFACES_DIR";
pub const WORKSPACE_VAR: &str = "WORKSPACE";

/// Directories the charm tool and the pipeline share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmEnv {
    /// Where `charm build` writes built charms.
    pub build_dir: PathBuf,
    /// Cache of pulled layers.
    pub layers_dir: PathBuf,
    /// Cache of pulled interfaces.
    pub interfaces_dir: PathBuf,
    /// Scratch space for source checkouts and bundle work.
    pub workspace: PathBuf,
}

impl CharmEnv {
    /// Read the environment of the current process.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve every directory through `lookup`. All four are required and
    /// every missing one is named in the error.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut get = |key: &str| match lookup(key).filter(|v| !v.trim().is_empty()) {
            Some(v) => PathBuf::from(v),
            None => {
                missing.push(key.to_string());
                PathBuf::new()
            }
        };

        let env = Self {
            build_dir: get(BUILD_DIR_VAR),
            layers_dir: get(LAYERS_DIR_VAR),
            interfaces_dir: get(INTERFACES_DIR_VAR),
            workspace: get(WORKSPACE_VAR),
        };

        if missing.is_empty() {
            Ok(env)
        } else {
            Err(ConfigError::MissingEnv(missing))
        }
    }

    /// Variables forwarded to every charm tool invocation.
    pub fn tool_env(&self) -> BTreeMap<String, String> {
        [
            (BUILD_DIR_VAR, &self.build_dir),
            (LAYERS_DIR_VAR, &self.layers_dir),
            (INTERFACES_DIR_VAR, &self.interfaces_dir),
            (WORKSPACE_VAR, &self.workspace),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string_lossy().to_string()))
        .collect()
    }
}
