//! Run configuration parsing.
//!
//! ```kdl
//! charms {
//!     charm-branch "master"
//!     to-channel "edge"
//!     filter-by-tag "k8s" "general"
//!     list "charm-support-matrix.yaml"
//!     resource-spec "resource-spec.yaml"
//!     layer-index "https://charmed-kubernetes.github.io/layer-index/"
//!     layer-list "charm-layer-list.yaml"
//!     layer-branch "master"
//! }
//! bundles {
//!     list "charm-bundles-list.yaml"
//!     repo "https://github.com/charmed-kubernetes/bundle.git"
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use charmforge_core::{Channel, RetryPolicy, TagFilter};
use kdl::{KdlDocument, KdlNode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::read_file;
use crate::{ConfigError, ConfigResult};

const DEFAULT_GIT_BASE_URL: &str = "https://github.com/";

/// Everything a run needs besides the build environment.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub charms: Option<CharmsConfig>,
    pub bundles: Option<BundlesConfig>,
}

/// Options for the charm build phase.
#[derive(Debug, Clone)]
pub struct CharmsConfig {
    /// Branch of each downstream charm repository to build from.
    pub charm_branch: String,
    /// Channel built charms are promoted to.
    pub to_channel: Channel,
    pub filter: TagFilter,
    /// Charm list manifest.
    pub list: PathBuf,
    pub resource_spec: Option<PathBuf>,
    /// Layers to cache before any charm builds.
    pub layers: Option<LayerSource>,
    /// Base that downstream repository references are joined onto.
    pub git_base_url: Url,
    pub retry: RetrySettings,
}

/// Where layers come from and which branch to check out.
#[derive(Debug, Clone)]
pub struct LayerSource {
    pub index: String,
    pub list: PathBuf,
    pub branch: String,
}

/// Options for the bundle phase.
#[derive(Debug, Clone)]
pub struct BundlesConfig {
    pub list: PathBuf,
    /// Git URL of the repository holding fragments and the assembler.
    pub repo: String,
    pub filter: TagFilter,
    pub to_channel: Channel,
}

/// Overrides for the download and attach retry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub download_attempts: u32,
    pub download_delay: Duration,
    pub attach_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            download_attempts: RetryPolicy::DOWNLOAD_ATTEMPTS,
            download_delay: RetryPolicy::DOWNLOAD_DELAY,
            attach_attempts: RetryPolicy::ATTACH_ATTEMPTS,
        }
    }
}

impl RetrySettings {
    pub fn download_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.download_attempts, self.download_delay)
    }

    pub fn attach_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attach_attempts, Duration::ZERO)
    }
}

impl CharmsConfig {
    /// Clone URL for a downstream reference such as `org/charm-foo`.
    /// Absolute URLs are used as-is.
    pub fn downstream_url(&self, downstream: &str) -> ConfigResult<Url> {
        if let Ok(url) = Url::parse(downstream) {
            return Ok(url);
        }
        self.git_base_url
            .join(downstream.trim_start_matches('/'))
            .map_err(|e| ConfigError::InvalidValue {
                field: "downstream".to_string(),
                message: format!("{}: {}", downstream, e),
            })
    }
}

/// Load a run configuration file.
pub fn load_run_config(path: &Path) -> ConfigResult<RunConfig> {
    let content = read_file(path)?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    parse_run_config(&content, base_dir)
}

/// Parse a run configuration from KDL text.
pub fn parse_run_config(kdl: &str, base_dir: &Path) -> ConfigResult<RunConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut charms_node = None;
    let mut bundles_node = None;

    for node in doc.nodes() {
        let slot = match node.name().value() {
            "charms" => &mut charms_node,
            "bundles" => &mut bundles_node,
            _ => continue, // Ignore unknown nodes
        };
        if slot.replace(node).is_some() {
            return Err(ConfigError::Duplicate(format!(
                "'{}' section",
                node.name().value()
            )));
        }
    }

    let charms = charms_node
        .map(|node| parse_charms(node, base_dir))
        .transpose()?;
    let bundles = bundles_node
        .map(|node| parse_bundles(node, charms.as_ref(), base_dir))
        .transpose()?;

    if charms.is_none() && bundles.is_none() {
        return Err(ConfigError::MissingField(
            "a 'charms' or 'bundles' section".to_string(),
        ));
    }

    Ok(RunConfig { charms, bundles })
}

fn parse_charms(node: &KdlNode, base_dir: &Path) -> ConfigResult<CharmsConfig> {
    let field = |name: &str| child_string(node, name);
    let required = |name: &str| {
        field(name).ok_or_else(|| ConfigError::MissingField(format!("charms.{}", name)))
    };

    let charm_branch = required("charm-branch")?;
    let to_channel = Channel::new(required("to-channel")?);
    let list = base_dir.join(required("list")?);
    let filter = required_filter(node, "charms")?;

    let layers = match field("layer-list") {
        Some(layer_list) => Some(LayerSource {
            index: field("layer-index").ok_or_else(|| {
                ConfigError::Conflict("charms.layer-list requires charms.layer-index".to_string())
            })?,
            list: base_dir.join(layer_list),
            branch: field("layer-branch").ok_or_else(|| {
                ConfigError::Conflict("charms.layer-list requires charms.layer-branch".to_string())
            })?,
        }),
        None => None,
    };

    let git_base_url = field("git-base-url").unwrap_or_else(|| DEFAULT_GIT_BASE_URL.to_string());
    let git_base_url = parse_base_url(&git_base_url)?;

    let retry = match child(node, "retry") {
        Some(retry_node) => parse_retry(retry_node)?,
        None => RetrySettings::default(),
    };

    Ok(CharmsConfig {
        charm_branch,
        to_channel,
        filter,
        list,
        resource_spec: field("resource-spec").map(|p| base_dir.join(p)),
        layers,
        git_base_url,
        retry,
    })
}

fn parse_bundles(
    node: &KdlNode,
    charms: Option<&CharmsConfig>,
    base_dir: &Path,
) -> ConfigResult<BundlesConfig> {
    let list = child_string(node, "list").ok_or_else(|| {
        ConfigError::Conflict("must have bundles.list defined to build bundles".to_string())
    })?;
    let repo = child_string(node, "repo")
        .ok_or_else(|| ConfigError::MissingField("bundles.repo".to_string()))?;

    let filter = match child(node, "filter-by-tag") {
        Some(_) => required_filter(node, "bundles")?,
        None => charms
            .map(|c| c.filter.clone())
            .ok_or_else(|| ConfigError::MissingField("bundles.filter-by-tag".to_string()))?,
    };

    let to_channel = match child_string(node, "to-channel") {
        Some(channel) => Channel::new(channel),
        None => charms
            .map(|c| c.to_channel.clone())
            .ok_or_else(|| ConfigError::MissingField("bundles.to-channel".to_string()))?,
    };

    Ok(BundlesConfig {
        list: base_dir.join(list),
        repo,
        filter,
        to_channel,
    })
}

fn parse_retry(node: &KdlNode) -> ConfigResult<RetrySettings> {
    let mut settings = RetrySettings::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let name = child.name().value();
            let value = get_first_integer_arg(child).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("charms.retry.{}", name),
                message: "expected a non-negative integer".to_string(),
            })?;
            match name {
                "download-attempts" => settings.download_attempts = positive(name, value)?,
                "download-delay-secs" => {
                    settings.download_delay = Duration::from_secs(u64::from(value))
                }
                "attach-attempts" => settings.attach_attempts = positive(name, value)?,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "charms.retry".to_string(),
                        message: format!("unknown setting: {}", name),
                    });
                }
            }
        }
    }

    Ok(settings)
}

fn positive(name: &str, value: u32) -> ConfigResult<u32> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: format!("charms.retry.{}", name),
            message: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn parse_base_url(raw: &str) -> ConfigResult<Url> {
    // A base without a trailing slash would have its last segment replaced on join.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| ConfigError::InvalidValue {
        field: "charms.git-base-url".to_string(),
        message: e.to_string(),
    })
}

fn required_filter(node: &KdlNode, section: &str) -> ConfigResult<TagFilter> {
    let tags = child(node, "filter-by-tag")
        .map(get_all_string_args)
        .unwrap_or_default();
    let filter = TagFilter::new(tags.iter().flat_map(|t| t.split(',')));
    if filter.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "{}.filter-by-tag",
            section
        )));
    }
    Ok(filter)
}

// Helper functions for extracting values from KDL nodes

fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|c| c.name().value() == name)
}

fn child_string(node: &KdlNode, name: &str) -> Option<String> {
    child(node, name).and_then(get_first_string_arg)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_first_integer_arg(node: &KdlNode) -> Option<u32> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|i| u32::try_from(i).ok())
}
