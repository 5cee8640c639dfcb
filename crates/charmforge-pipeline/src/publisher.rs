//! Push built artifacts to the store and stamp their provenance.

use charmforge_core::{Entity, Error, PublishedArtifact, ResourceBinding, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{InPhase, PhaseError};
use crate::report::Phase;
use crate::toolchain::Toolchain;

const METADATA_FILE: &str = "metadata.yaml";
const OCI_IMAGE: &str = "oci-image";

#[derive(Debug, Default, Deserialize)]
struct CharmMetadata {
    #[serde(default)]
    resources: BTreeMap<String, ResourceDecl>,
}

#[derive(Debug, Deserialize)]
struct ResourceDecl {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "upstream-source")]
    upstream_source: Option<String>,
}

/// `(resource name, image)` for every OCI image resource that names an
/// upstream source.
fn image_resources(metadata: &str) -> Result<Vec<(String, String)>> {
    if metadata.trim().is_empty() {
        return Ok(Vec::new());
    }
    let metadata: Option<CharmMetadata> = serde_yaml::from_str(metadata)
        .map_err(|e| Error::malformed(METADATA_FILE, e.to_string()))?;
    Ok(metadata
        .unwrap_or_default()
        .resources
        .into_iter()
        .filter(|(_, decl)| decl.kind.as_deref() == Some(OCI_IMAGE))
        .filter_map(|(name, decl)| decl.upstream_source.map(|image| (name, image)))
        .collect())
}

pub struct Publisher<'a> {
    tools: &'a Toolchain,
}

impl<'a> Publisher<'a> {
    pub fn new(tools: &'a Toolchain) -> Self {
        Self { tools }
    }

    /// Push `artifact` as `entity` exactly once and stamp it with the commit
    /// checked out in `source`. Bundles carry no image resources.
    pub async fn publish(
        &self,
        source: &Path,
        artifact: &Path,
        entity: &Entity,
        is_bundle: bool,
    ) -> std::result::Result<PublishedArtifact, PhaseError> {
        let revision = self
            .tools
            .git
            .head_revision(source)
            .await
            .in_phase(Phase::Publish)?;

        let images = if is_bundle {
            Vec::new()
        } else {
            let metadata = tokio::fs::read_to_string(artifact.join(METADATA_FILE))
                .await
                .in_phase(Phase::Publish)?;
            image_resources(&metadata).in_phase(Phase::Publish)?
        };

        for (name, image) in &images {
            info!(entity = %entity, resource = %name, image = %image, "Pre-fetching image");
            self.tools.images.pull(image).await.in_phase(Phase::Publish)?;
        }

        info!(entity = %entity, artifact = %artifact.display(), "Pushing");
        let url = self
            .tools
            .charm
            .push(artifact, entity, &images)
            .await
            .in_phase(Phase::Publish)?;

        if let Err(e) = self.tools.charm.set_commit(&url, &revision).await {
            warn!(entity = %entity, url = %url, error = %e, "Published but revision stamp failed");
            return Err(PhaseError::new(
                Phase::Stamp,
                Error::StampFailed {
                    url,
                    source: Box::new(e.into()),
                },
            ));
        }
        info!(entity = %entity, url = %url, commit = %revision, "Published");

        Ok(PublishedArtifact {
            entity: entity.clone(),
            url,
            revision,
            resources: images
                .into_iter()
                .map(|(name, reference)| (name, ResourceBinding::Image { reference }))
                .collect(),
        })
    }
}
