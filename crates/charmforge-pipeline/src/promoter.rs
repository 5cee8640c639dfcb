//! Release published revisions from one channel to another.

use charmforge_core::{BundleSpec, Channel, ComponentSpec, Entity, Result, TagFilter};
use std::collections::HashSet;
use tracing::{error, info};

use crate::report::{EventSink, PipelineEvent, PromotionReport, PromotionState, RunReport};
use crate::toolchain::Toolchain;

/// Something that can be promoted: a charm or a bundle manifest entry.
pub trait PromotionTarget {
    fn entity(&self) -> Entity;
    fn tags(&self) -> &[String];
}

impl PromotionTarget for ComponentSpec {
    fn entity(&self) -> Entity {
        ComponentSpec::entity(self)
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl PromotionTarget for BundleSpec {
    fn entity(&self) -> Entity {
        BundleSpec::entity(self)
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }
}

pub struct Promoter<'a> {
    tools: &'a Toolchain,
    events: EventSink,
}

impl<'a> Promoter<'a> {
    pub fn new(tools: &'a Toolchain) -> Self {
        Self {
            tools,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Promote every entry the filter selects. A failure only affects its
    /// own entity.
    pub async fn promote_all<T: PromotionTarget>(
        &self,
        entries: &[T],
        filter: &TagFilter,
        from: &Channel,
        to: &Channel,
    ) -> Vec<PromotionReport> {
        let mut reports = Vec::new();
        for entry in entries.iter().filter(|e| filter.matches(e.tags())) {
            reports.push(self.promote_reported(entry.entity(), from, to).await);
        }
        reports
    }

    /// Promote the selected entries `build` published. Selected entries it
    /// did not publish are reported skipped.
    pub async fn promote_published<T: PromotionTarget>(
        &self,
        entries: &[T],
        build: &RunReport,
        filter: &TagFilter,
        from: &Channel,
        to: &Channel,
    ) -> Vec<PromotionReport> {
        let published: HashSet<&Entity> = build.published().map(|e| &e.entity).collect();
        let mut reports = Vec::new();
        for entry in entries.iter().filter(|e| filter.matches(e.tags())) {
            let entity = entry.entity();
            if published.contains(&entity) {
                reports.push(self.promote_reported(entity, from, to).await);
            } else {
                info!(entity = %entity, "Not published in this run, skipping promotion");
                reports.push(PromotionReport {
                    entity,
                    from: from.clone(),
                    to: to.clone(),
                    state: PromotionState::Skipped {
                        reason: "not published in this run".to_string(),
                    },
                });
            }
        }
        reports
    }

    async fn promote_reported(
        &self,
        entity: Entity,
        from: &Channel,
        to: &Channel,
    ) -> PromotionReport {
        let state = match self.promote(&entity, from, to).await {
            Ok(state) => state,
            Err(e) => {
                error!(entity = %entity, error = %e, "Promotion failed");
                PromotionState::Failed {
                    message: e.to_string(),
                }
            }
        };
        self.events.emit(PipelineEvent::PromotionCompleted {
            entity: entity.clone(),
            success: matches!(state, PromotionState::Released { .. }),
        });
        PromotionReport {
            entity,
            from: from.clone(),
            to: to.clone(),
            state,
        }
    }

    /// Release the revision of `entity` at `from` into `to`, carrying its
    /// resource revisions along.
    pub async fn promote(
        &self,
        entity: &Entity,
        from: &Channel,
        to: &Channel,
    ) -> Result<PromotionState> {
        let id = self.tools.charm.show_id(entity, from).await?;
        let resources = self
            .tools
            .charm
            .list_resources(&id, from)
            .await?
            .unwrap_or_default();

        info!(entity = %entity, id = %id, from = %from, to = %to, "Releasing");
        self.tools.charm.release(&id, to, &resources).await?;

        Ok(PromotionState::Released {
            id,
            resources: resources.iter().map(|r| r.release_arg()).collect(),
        })
    }
}
