//! Components, bundles, layers and their published forms.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A charm to build, as declared in the charm list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Charm name (the manifest key).
    pub name: String,
    /// Store namespace (user or team).
    pub namespace: String,
    /// Upstream source location, informational.
    pub upstream: Option<String>,
    /// Repository the built charm source is cloned from, e.g. `org/charm-foo`.
    pub downstream: Option<String>,
    /// Selection tags.
    pub tags: Vec<String>,
    /// Script, relative to the source checkout, that produces resource files.
    pub resource_build_sh: Option<String>,
}

impl ComponentSpec {
    pub fn entity(&self) -> Entity {
        Entity::new(&self.namespace, &self.name)
    }
}

/// A bundle to assemble, as declared in the bundle list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSpec {
    pub name: String,
    pub namespace: String,
    pub tags: Vec<String>,
    /// Fragment paths handed to the bundle assembler.
    pub fragments: Vec<String>,
}

impl BundleSpec {
    pub fn entity(&self) -> Entity {
        Entity::new(&self.namespace, &self.name)
    }
}

/// Store identity of a charm or bundle, rendered `cs:~<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("cs:~{namespace}/{name}")]
pub struct Entity {
    pub namespace: String,
    pub name: String,
}

impl Entity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Release channel label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Where freshly pushed revisions land.
    pub fn unpublished() -> Self {
        Self::new("unpublished")
    }

    pub fn edge() -> Self {
        Self::new("edge")
    }

    pub fn stable() -> Self {
        Self::new("stable")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of reusable source dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum LayerKind {
    #[display("layer")]
    Layer,
    #[display("interface")]
    Interface,
}

/// A layer or interface to fetch before any charm builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{kind}:{name}")]
pub struct LayerRef {
    pub kind: LayerKind,
    pub name: String,
}

impl LayerRef {
    /// Layer-list key that is an index entry rather than a layer.
    pub const INDEX_SENTINEL: &'static str = "layer:index";

    /// Parse a `kind:name` layer-list key.
    pub fn parse(key: &str) -> Result<Self> {
        let (kind, name) = key
            .split_once(':')
            .ok_or_else(|| Error::UnknownLayerKind(key.to_string()))?;
        let kind = match kind {
            "layer" => LayerKind::Layer,
            "interface" => LayerKind::Interface,
            _ => return Err(Error::UnknownLayerKind(key.to_string())),
        };
        if name.is_empty() {
            return Err(Error::UnknownLayerKind(key.to_string()));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }

    /// Local checkout of this ref under the managed layer/interface trees.
    pub fn checkout_dir(&self, layers_dir: &Path, interfaces_dir: &Path) -> PathBuf {
        match self.kind {
            LayerKind::Layer => layers_dir.join(&self.name),
            LayerKind::Interface => interfaces_dir.join(&self.name),
        }
    }
}

/// Outcome of a successful component build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub name: String,
    /// Source checkout, used for revision stamping and resource scripts.
    pub source_path: PathBuf,
    /// Built charm directory.
    pub artifact_path: PathBuf,
    /// Resolved resource-builder script, when the component declares one.
    pub resource_builder: Option<PathBuf>,
}

impl BuildResult {
    /// Directory resource builders write into.
    pub fn resource_output_dir(&self) -> PathBuf {
        self.artifact_path.join("tmp")
    }
}

/// How a resource got bound to a published entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResourceBinding {
    /// Container image reference passed at push time.
    Image { reference: String },
    /// Local file attached after the push.
    File {
        path: PathBuf,
        revision: Option<u32>,
    },
}

/// A charm or bundle pushed to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub entity: Entity,
    /// Canonical URL returned by the push, e.g. `cs:~ns/mycharm-3`.
    pub url: String,
    /// Source commit stamped onto the entity.
    pub revision: String,
    /// Resource name to binding.
    pub resources: BTreeMap<String, ResourceBinding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_display() {
        assert_eq!(Entity::new("containers", "etcd").to_string(), "cs:~containers/etcd");
    }

    #[test]
    fn test_layer_ref_parse() {
        let layer = LayerRef::parse("layer:basic").unwrap();
        assert_eq!(layer.kind, LayerKind::Layer);
        assert_eq!(layer.name, "basic");
        assert_eq!(layer.to_string(), "layer:basic");

        let iface = LayerRef::parse("interface:http").unwrap();
        assert_eq!(iface.kind, LayerKind::Interface);
    }

    #[test]
    fn test_layer_ref_unknown_kind() {
        for key in ["charm:foo", "basic", "layer:"] {
            assert!(matches!(
                LayerRef::parse(key),
                Err(Error::UnknownLayerKind(_))
            ));
        }
    }

    #[test]
    fn test_checkout_dir_by_kind() {
        let layers = Path::new("/cache/layers");
        let interfaces = Path::new("/cache/interfaces");
        assert_eq!(
            LayerRef::parse("layer:basic").unwrap().checkout_dir(layers, interfaces),
            layers.join("basic")
        );
        assert_eq!(
            LayerRef::parse("interface:http").unwrap().checkout_dir(layers, interfaces),
            interfaces.join("http")
        );
    }

    #[test]
    fn test_resource_binding_serializes_tagged() {
        let binding = ResourceBinding::Image {
            reference: "rocks/etcd:3.4".to_string(),
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["source"], "image");
        assert_eq!(json["reference"], "rocks/etcd:3.4");
    }
}
