//! Layer and interface cache population.

use charmforge_config::CharmEnv;
use charmforge_core::{Error, LayerRef, Result, RetryPolicy};
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::report::{EventSink, PipelineEvent};
use crate::toolchain::Toolchain;

/// Downloads every listed layer and pins it to a branch.
pub struct LayerResolver<'a> {
    tools: &'a Toolchain,
    env: &'a CharmEnv,
    policy: RetryPolicy,
    events: EventSink,
}

impl<'a> LayerResolver<'a> {
    pub fn new(tools: &'a Toolchain, env: &'a CharmEnv, policy: RetryPolicy) -> Self {
        Self {
            tools,
            env,
            policy,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Parse the layer-list keys, skipping the index sentinel. Any bad kind
    /// fails before anything is downloaded.
    pub fn parse(keys: &[String]) -> Result<Vec<LayerRef>> {
        keys.iter()
            .filter(|key| key.as_str() != LayerRef::INDEX_SENTINEL)
            .map(|key| LayerRef::parse(key))
            .collect()
    }

    /// Resolve every entry in order. The first failure aborts.
    pub async fn resolve_all(
        &self,
        index: &str,
        keys: &[String],
        branch: &str,
    ) -> Result<Vec<PathBuf>> {
        let layers = Self::parse(keys)?;
        info!(count = layers.len(), index, branch, "Resolving layers");

        let mut checkouts = Vec::with_capacity(layers.len());
        for layer in &layers {
            checkouts.push(self.resolve(index, layer, branch).await?);
            self.events.emit(PipelineEvent::LayerResolved {
                layer: layer.to_string(),
            });
        }
        Ok(checkouts)
    }

    /// Download one layer, confirm it landed, then force its branch.
    pub async fn resolve(&self, index: &str, layer: &LayerRef, branch: &str) -> Result<PathBuf> {
        let operation = format!("pull-source {}", layer);
        self.tools
            .retry
            .execute(&operation, &self.policy, || {
                self.tools.charm.pull_source(index, layer)
            })
            .await?;

        let checkout = layer.checkout_dir(&self.env.layers_dir, &self.env.interfaces_dir);
        let present = tokio::fs::metadata(&checkout)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !present {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found at {} after download", layer, checkout.display()),
            )));
        }

        debug!(layer = %layer, path = %checkout.display(), branch, "Checking out layer branch");
        self.tools.git.checkout_force(&checkout, branch).await?;
        Ok(checkout)
    }
}
