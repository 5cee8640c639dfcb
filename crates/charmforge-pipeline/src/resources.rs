//! Build and attach file resources for a published charm.

use charmforge_config::ResourceSpec;
use charmforge_core::{
    Channel, Entity, Error, ResourceBinding, Result, RetryPolicy, ToolInvocation,
};
use charmforge_executor::charm::parse_attach_revision;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::toolchain::Toolchain;

pub struct ResourceAttacher<'a> {
    tools: &'a Toolchain,
    policy: RetryPolicy,
}

impl<'a> ResourceAttacher<'a> {
    pub fn new(tools: &'a Toolchain, policy: RetryPolicy) -> Self {
        Self { tools, policy }
    }

    /// Run `builder` inside `out_dir` and attach every produced file the
    /// entity's resource-spec fragment names. Returns nothing attached when
    /// the store reports the entity has no resources.
    pub async fn attach(
        &self,
        entity: &Entity,
        channel: &Channel,
        builder: &Path,
        out_dir: &Path,
        spec: &ResourceSpec,
    ) -> Result<BTreeMap<String, ResourceBinding>> {
        let fragment = spec
            .fragment(entity)
            .ok_or_else(|| Error::MissingResourceSpec(entity.to_string()))?;
        tokio::fs::create_dir_all(out_dir).await?;

        let id = self.tools.charm.show_id(entity, channel).await?;
        if self.tools.charm.list_resources(&id, channel).await?.is_none() {
            info!(entity = %entity, "No resources declared, nothing to attach");
            return Ok(BTreeMap::new());
        }

        let script = std::path::absolute(builder)?;
        info!(entity = %entity, script = %script.display(), "Building resources");
        let inv = ToolInvocation::new("bash")
            .arg(script.to_string_lossy())
            .current_dir(out_dir);
        self.tools.runner.run(&inv).await?;

        let mut attached = BTreeMap::new();
        for file in produced_files(out_dir).await? {
            let Some(key) = fragment.get(&file) else {
                debug!(entity = %entity, file = %file, "Produced file not in resource spec");
                continue;
            };
            let path = out_dir.join(&file);
            let operation = format!("attach {}={}", key, file);
            let output = self
                .tools
                .retry
                .execute(&operation, &self.policy, || {
                    self.tools.charm.attach(entity, channel, key, &path)
                })
                .await?;

            let revision = parse_attach_revision(&output.combined());
            info!(entity = %entity, resource = %key, ?revision, "Attached resource");
            attached.insert(key.clone(), ResourceBinding::File { path, revision });
        }
        Ok(attached)
    }
}

/// Names of regular files directly inside `dir`, sorted.
async fn produced_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    files.sort();
    Ok(files)
}
