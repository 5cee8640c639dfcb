//! Configuration loading for charmforge.
//!
//! This crate handles parsing of:
//! - The run configuration (charmforge.kdl)
//! - Charm, bundle and layer lists and the resource spec (YAML manifests)
//! - The build environment directories

pub mod env;
pub mod error;
pub mod manifest;
pub mod run;

pub use env::CharmEnv;
pub use error::{ConfigError, ConfigResult};
pub use manifest::ResourceSpec;
pub use run::{BundlesConfig, CharmsConfig, LayerSource, RetrySettings, RunConfig};
