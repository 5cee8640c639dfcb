//! YAML manifest loading.
//!
//! Charm and bundle lists are sequences of single-key mappings keyed by the
//! entry name:
//!
//! ```yaml
//! - kubernetes-worker:
//!     namespace: containers
//!     downstream: charmed-kubernetes/charm-kubernetes-worker
//!     tags: [k8s, general]
//!     resource_build_sh: build-resources.sh
//! ```
//!
//! The layer list uses `kind:name` keys, and the resource spec maps an
//! entity id to `{produced filename: resource key}`.

use charmforge_core::{BundleSpec, ComponentSpec, Entity};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::read_file;
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Deserialize)]
struct CharmEntry {
    namespace: String,
    #[serde(default)]
    tags: Vec<String>,
    upstream: Option<String>,
    downstream: Option<String>,
    resource_build_sh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BundleEntry {
    namespace: String,
    #[serde(default)]
    tags: Vec<String>,
    fragments: Fragments,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Fragments {
    Joined(String),
    List(Vec<String>),
}

impl Fragments {
    fn into_vec(self) -> Vec<String> {
        match self {
            Fragments::Joined(s) => s.split_whitespace().map(str::to_string).collect(),
            Fragments::List(v) => v,
        }
    }
}

/// Parse a charm list.
pub fn parse_charm_list(yaml: &str) -> ConfigResult<Vec<ComponentSpec>> {
    named_entries::<CharmEntry>(yaml, "charm list")?
        .into_iter()
        .map(|(name, entry)| {
            Ok(ComponentSpec {
                name,
                namespace: entry.namespace,
                upstream: entry.upstream,
                downstream: entry.downstream,
                tags: entry.tags,
                resource_build_sh: entry.resource_build_sh,
            })
        })
        .collect()
}

pub fn load_charm_list(path: &Path) -> ConfigResult<Vec<ComponentSpec>> {
    parse_charm_list(&read_file(path)?)
}

/// Parse a bundle list.
pub fn parse_bundle_list(yaml: &str) -> ConfigResult<Vec<BundleSpec>> {
    named_entries::<BundleEntry>(yaml, "bundle list")?
        .into_iter()
        .map(|(name, entry)| {
            let fragments = entry.fragments.into_vec();
            if fragments.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "fragments for bundle '{}'",
                    name
                )));
            }
            Ok(BundleSpec {
                name,
                namespace: entry.namespace,
                tags: entry.tags,
                fragments,
            })
        })
        .collect()
}

pub fn load_bundle_list(path: &Path) -> ConfigResult<Vec<BundleSpec>> {
    parse_bundle_list(&read_file(path)?)
}

/// Parse a layer list into its `kind:name` keys, in document order.
///
/// Keys are not interpreted here; the `layer:index` sentinel and unknown
/// kinds are the resolver's concern.
pub fn parse_layer_list(yaml: &str) -> ConfigResult<Vec<String>> {
    let entries: Vec<serde_yaml::Mapping> = from_yaml(yaml, "layer list")?;
    let mut keys = Vec::new();
    for mapping in entries {
        for key in mapping.keys() {
            let key = key.as_str().ok_or_else(|| ConfigError::InvalidValue {
                field: "layer list".to_string(),
                message: format!("non-string key {:?}", key),
            })?;
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

pub fn load_layer_list(path: &Path) -> ConfigResult<Vec<String>> {
    parse_layer_list(&read_file(path)?)
}

/// Maps each entity to the files its resource builder produces and the
/// resource key each file is attached under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ResourceSpec(BTreeMap<String, BTreeMap<String, String>>);

impl ResourceSpec {
    pub fn parse(yaml: &str) -> ConfigResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        from_yaml(yaml, "resource spec")
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        Self::parse(&read_file(path)?)
    }

    /// Filename to resource key mapping for `entity`.
    pub fn fragment(&self, entity: &Entity) -> Option<&BTreeMap<String, String>> {
        self.0
            .get(&entity.to_string())
            .filter(|fragment| !fragment.is_empty())
    }
}

impl FromIterator<(String, BTreeMap<String, String>)> for ResourceSpec {
    fn from_iter<I: IntoIterator<Item = (String, BTreeMap<String, String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn from_yaml<T: DeserializeOwned>(yaml: &str, what: &str) -> ConfigResult<T> {
    serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
        what: what.to_string(),
        source,
    })
}

/// Flatten a sequence of `{name: body}` mappings, keeping document order and
/// rejecting duplicate names. Names become directory names under the build
/// workspace, so they must be a single plain path component.
fn named_entries<T: DeserializeOwned>(yaml: &str, what: &str) -> ConfigResult<Vec<(String, T)>> {
    let entries: Vec<serde_yaml::Mapping> = from_yaml(yaml, what)?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for mapping in entries {
        for (key, body) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: what.to_string(),
                    message: format!("non-string entry name {:?}", key),
                })?
                .to_string();
            if !is_plain_component(&name) {
                return Err(ConfigError::InvalidValue {
                    field: what.to_string(),
                    message: format!("entry name {:?} is not a plain directory name", name),
                });
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::Duplicate(format!("{} entry '{}'", what, name)));
            }
            let body = serde_yaml::from_value(body).map_err(|source| ConfigError::Yaml {
                what: format!("{} entry '{}'", what, name),
                source,
            })?;
            out.push((name, body));
        }
    }

    Ok(out)
}

fn is_plain_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
