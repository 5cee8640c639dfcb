//! Charm pipeline orchestrator - resolves layers, then builds, publishes and
//! attaches resources for each selected charm in turn, then promotes.

use charmforge_config::manifest::{load_charm_list, load_layer_list};
use charmforge_config::{CharmEnv, CharmsConfig, ConfigResult, ResourceSpec};
use charmforge_core::{Channel, ComponentSpec, PublishedArtifact};
use charmforge_executor::RetryingExecutor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::builder::ComponentBuilder;
use crate::error::{InPhase, PhaseError};
use crate::layers::LayerResolver;
use crate::promoter::Promoter;
use crate::publisher::Publisher;
use crate::report::{
    EntryReport, EntryState, EventSink, Phase, PipelineEvent, RunKind, RunReport,
};
use crate::resources::ResourceAttacher;
use crate::toolchain::Toolchain;

/// Manifests a charm run works from.
#[derive(Debug, Clone, Default)]
pub struct CharmInputs {
    pub charms: Vec<ComponentSpec>,
    /// Layer-list keys in manifest order.
    pub layers: Vec<String>,
    pub resource_spec: ResourceSpec,
}

impl CharmInputs {
    /// Read every manifest `config` names.
    pub fn load(config: &CharmsConfig) -> ConfigResult<Self> {
        let charms = load_charm_list(&config.list)?;
        let layers = match &config.layers {
            Some(source) => load_layer_list(&source.list)?,
            None => Vec::new(),
        };
        let resource_spec = match &config.resource_spec {
            Some(path) => ResourceSpec::load(path)?,
            None => ResourceSpec::default(),
        };
        Ok(Self {
            charms,
            layers,
            resource_spec,
        })
    }
}

/// Orchestrates one charm run.
#[derive(Debug, Clone)]
pub struct CharmPipeline {
    tools: Toolchain,
    env: CharmEnv,
    config: CharmsConfig,
    inputs: CharmInputs,
    dry_run: bool,
}

impl CharmPipeline {
    pub fn new(tools: Toolchain, env: CharmEnv, config: CharmsConfig, inputs: CharmInputs) -> Self {
        Self {
            tools,
            env,
            config,
            inputs,
            dry_run: false,
        }
    }

    /// List what would run instead of running it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Execute the run, returning a channel of events and a handle to get the
    /// final report. Retry attempts are reported on the same channel.
    pub fn execute(&self) -> (mpsc::UnboundedReceiver<PipelineEvent>, JoinHandle<RunReport>) {
        let (events, rx) = EventSink::channel();
        let observer = events.clone();
        let mut pipeline = self.clone();
        pipeline.tools = pipeline
            .tools
            .with_retry(RetryingExecutor::with_observer(move |attempt| {
                observer.emit(PipelineEvent::Attempt(attempt.clone()))
            }));

        let handle = tokio::spawn(async move { pipeline.run(&events).await });
        (rx, handle)
    }

    pub async fn run(&self, events: &EventSink) -> RunReport {
        let mut report = RunReport::new(RunKind::Charms, self.dry_run);
        events.emit(PipelineEvent::RunStarted {
            run_id: report.run_id,
            kind: RunKind::Charms,
        });

        let selected: Vec<&ComponentSpec> = self
            .inputs
            .charms
            .iter()
            .filter(|c| self.config.filter.matches(&c.tags))
            .collect();
        info!(
            run_id = %report.run_id,
            selected = selected.len(),
            filter = %self.config.filter,
            "Charm run starting"
        );

        if self.dry_run {
            self.plan(&selected, &mut report, events);
            return self.complete(report, events);
        }

        if let Some(source) = &self.config.layers {
            let policy = self.config.retry.download_policy();
            let resolved = LayerResolver::new(&self.tools, &self.env, policy)
                .with_events(events.clone())
                .resolve_all(&source.index, &self.inputs.layers, &source.branch)
                .await;
            if let Err(e) = resolved {
                error!(error = %e, "Layer resolution failed, no charm will be built");
                report.abort(Phase::Layers, e.to_string());
                return self.complete(report, events);
            }
        }

        for spec in selected {
            events.emit(PipelineEvent::EntryStarted {
                name: spec.name.clone(),
            });
            let state = match self.process(spec, events).await {
                Ok(artifact) => {
                    info!(charm = %spec.name, url = %artifact.url, "Charm completed");
                    EntryState::Succeeded { artifact }
                }
                Err(e) => {
                    error!(charm = %spec.name, phase = %e.phase, error = %e.source, "Charm failed");
                    EntryState::Failed {
                        phase: e.phase,
                        message: e.source.to_string(),
                    }
                }
            };
            events.emit(PipelineEvent::EntryCompleted {
                name: spec.name.clone(),
                success: state.is_success(),
            });
            report.entries.push(EntryReport {
                name: spec.name.clone(),
                entity: spec.entity(),
                state,
            });
        }

        report.promotions = Promoter::new(&self.tools)
            .with_events(events.clone())
            .promote_published(
                &self.inputs.charms,
                &report,
                &self.config.filter,
                &Channel::unpublished(),
                &self.config.to_channel,
            )
            .await;

        self.complete(report, events)
    }

    fn plan(&self, selected: &[&ComponentSpec], report: &mut RunReport, events: &EventSink) {
        for spec in selected {
            let detail = format!(
                "vcs-branch: {} to-channel: {} tags: {}",
                self.config.charm_branch,
                self.config.to_channel,
                spec.tags.join(",")
            );
            info!(charm = %spec.name, "{}", detail);
            events.emit(PipelineEvent::EntryPlanned {
                name: spec.name.clone(),
                detail: detail.clone(),
            });
            report.entries.push(EntryReport {
                name: spec.name.clone(),
                entity: spec.entity(),
                state: EntryState::Planned { detail },
            });
        }
    }

    fn complete(&self, report: RunReport, events: &EventSink) -> RunReport {
        let report = report.finish();
        let outcome = report.outcome();
        info!(run_id = %report.run_id, %outcome, "Charm run finished");
        events.emit(PipelineEvent::RunCompleted { outcome });
        report
    }

    /// Build, publish and attach resources for one charm.
    async fn process(
        &self,
        spec: &ComponentSpec,
        events: &EventSink,
    ) -> Result<PublishedArtifact, PhaseError> {
        let build = ComponentBuilder::new(&self.tools, &self.env, &self.config)
            .with_events(events.clone())
            .build(spec)
            .await?;

        let entity = spec.entity();
        events.emit(PipelineEvent::EntryPhase {
            name: spec.name.clone(),
            phase: Phase::Publish,
        });
        let mut artifact = Publisher::new(&self.tools)
            .publish(&build.source_path, &build.artifact_path, &entity, false)
            .await?;

        let Some(script) = &build.resource_builder else {
            return Ok(artifact);
        };
        events.emit(PipelineEvent::EntryPhase {
            name: spec.name.clone(),
            phase: Phase::Attach,
        });
        let attached = ResourceAttacher::new(&self.tools, self.config.retry.attach_policy())
            .attach(
                &entity,
                &Channel::unpublished(),
                script,
                &build.resource_output_dir(),
                &self.inputs.resource_spec,
            )
            .await
            .in_phase(Phase::Attach);
        match attached {
            Ok(files) => {
                artifact.resources.extend(files);
                Ok(artifact)
            }
            Err(e) => {
                warn!(charm = %spec.name, url = %artifact.url, "Published without its resources");
                Err(e)
            }
        }
    }
}
