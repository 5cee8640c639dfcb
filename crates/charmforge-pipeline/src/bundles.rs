//! Bundle assembly, publication and promotion.

use charmforge_config::manifest::load_bundle_list;
use charmforge_config::{BundlesConfig, CharmEnv, ConfigResult};
use charmforge_core::{BundleSpec, Channel, PublishedArtifact};
use charmforge_executor::RetryingExecutor;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{InPhase, PhaseError};
use crate::promoter::Promoter;
use crate::publisher::Publisher;
use crate::report::{EntryReport, EntryState, EventSink, Phase, PipelineEvent, RunKind, RunReport};
use crate::toolchain::Toolchain;

const REPO_DIR: &str = "bundles-kubernetes";
const SCRATCH_DIR: &str = "tmp-bundles";

/// Assembles every selected bundle from the bundle repository, publishes
/// it, then promotes what was published.
#[derive(Debug, Clone)]
pub struct BundlePipeline {
    tools: Toolchain,
    env: CharmEnv,
    config: BundlesConfig,
    bundles: Vec<BundleSpec>,
    dry_run: bool,
}

impl BundlePipeline {
    pub fn new(
        tools: Toolchain,
        env: CharmEnv,
        config: BundlesConfig,
        bundles: Vec<BundleSpec>,
    ) -> Self {
        Self {
            tools,
            env,
            config,
            bundles,
            dry_run: false,
        }
    }

    /// Read the bundle list named by `config`.
    pub fn load(tools: Toolchain, env: CharmEnv, config: BundlesConfig) -> ConfigResult<Self> {
        let bundles = load_bundle_list(&config.list)?;
        Ok(Self::new(tools, env, config, bundles))
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run in a spawned task, streaming events as it goes.
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
        let mut report = RunReport::new(RunKind::Bundles, self.dry_run);
        events.emit(PipelineEvent::RunStarted {
            run_id: report.run_id,
            kind: RunKind::Bundles,
        });

        let selected: Vec<&BundleSpec> = self
            .bundles
            .iter()
            .filter(|b| self.config.filter.matches(&b.tags))
            .collect();
        info!(selected = selected.len(), filter = %self.config.filter, "Bundle run starting");

        if self.dry_run {
            for bundle in selected {
                let detail = format!(
                    "repo: {} to-channel: {} tags: {} fragments: {}",
                    self.config.repo,
                    self.config.to_channel,
                    bundle.tags.join(","),
                    bundle.fragments.join(" ")
                );
                events.emit(PipelineEvent::EntryPlanned {
                    name: bundle.name.clone(),
                    detail: detail.clone(),
                });
                report.entries.push(EntryReport {
                    name: bundle.name.clone(),
                    entity: bundle.entity(),
                    state: EntryState::Planned { detail },
                });
            }
            return self.complete(report, events);
        }

        let repo_dir = self.env.workspace.join(REPO_DIR);
        if let Err(e) = self.prepare_repo(&repo_dir).await {
            error!(error = %e, "Bundle repository setup failed");
            report.abort(e.phase, e.source.to_string());
            return self.complete(report, events);
        }

        for bundle in selected {
            events.emit(PipelineEvent::EntryStarted {
                name: bundle.name.clone(),
            });
            let state = match self.build_one(bundle, &repo_dir, events).await {
                Ok(artifact) => EntryState::Succeeded { artifact },
                Err(e) => {
                    error!(bundle = %bundle.name, phase = %e.phase, error = %e.source, "Bundle failed");
                    EntryState::Failed {
                        phase: e.phase,
                        message: e.source.to_string(),
                    }
                }
            };
            events.emit(PipelineEvent::EntryCompleted {
                name: bundle.name.clone(),
                success: state.is_success(),
            });
            report.entries.push(EntryReport {
                name: bundle.name.clone(),
                entity: bundle.entity(),
                state,
            });
        }

        report.promotions = Promoter::new(&self.tools)
            .with_events(events.clone())
            .promote_published(
                &self.bundles,
                &report,
                &self.config.filter,
                &Channel::unpublished(),
                &self.config.to_channel,
            )
            .await;

        self.complete(report, events)
    }

    fn complete(&self, report: RunReport, events: &EventSink) -> RunReport {
        let report = report.finish();
        let outcome = report.outcome();
        info!(run_id = %report.run_id, %outcome, "Bundle run finished");
        events.emit(PipelineEvent::RunCompleted { outcome });
        report
    }

    /// Fresh bundle repository checkout and an empty scratch directory that
    /// bundles are assembled into.
    async fn prepare_repo(&self, repo_dir: &Path) -> Result<(), PhaseError> {
        for dir in [repo_dir.to_path_buf(), self.env.workspace.join(SCRATCH_DIR)] {
            if tokio::fs::try_exists(&dir).await.in_phase(Phase::Prepare)? {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .in_phase(Phase::Prepare)?;
            }
            tokio::fs::create_dir_all(&dir)
                .await
                .in_phase(Phase::Prepare)?;
        }

        info!(repo = %self.config.repo, "Cloning bundle repository");
        self.tools
            .git
            .clone_repo(&self.config.repo, None, repo_dir)
            .await
            .in_phase(Phase::Clone)
    }

    async fn build_one(
        &self,
        bundle: &BundleSpec,
        repo_dir: &Path,
        events: &EventSink,
    ) -> Result<PublishedArtifact, PhaseError> {
        let output_dir = self.env.workspace.join(SCRATCH_DIR).join(&bundle.name);
        events.emit(PipelineEvent::EntryPhase {
            name: bundle.name.clone(),
            phase: Phase::Assemble,
        });
        info!(bundle = %bundle.name, fragments = %bundle.fragments.join(" "), "Assembling bundle");
        self.tools
            .bundle
            .assemble(
                repo_dir,
                &output_dir,
                &self.config.to_channel,
                &bundle.fragments,
            )
            .await
            .in_phase(Phase::Assemble)?;

        events.emit(PipelineEvent::EntryPhase {
            name: bundle.name.clone(),
            phase: Phase::Publish,
        });
        Publisher::new(&self.tools)
            .publish(repo_dir, &output_dir, &bundle.entity(), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{PromotionState, RunOutcome};
    use crate::testing::{FakeImages, FakeRunner, exit, healthy_store, temp_env, toolchain};
    use charmforge_core::TagFilter;
    use std::sync::Arc;

    fn config() -> BundlesConfig {
        BundlesConfig {
            list: "bundles.yaml".into(),
            repo: "https://github.com/charmed-kubernetes/bundle".to_string(),
            filter: TagFilter::parse("k8s"),
            to_channel: Channel::edge(),
        }
    }

    fn bundle(name: &str, tags: &[&str]) -> BundleSpec {
        BundleSpec {
            name: name.to_string(),
            namespace: "containers".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            fragments: vec!["k8s/cdk".to_string(), "cni/flannel".to_string()],
        }
    }

    #[tokio::test]
    async fn test_bundle_run() {
        let (_dir, env) = temp_env();
        let stale = env.workspace.join(REPO_DIR).join("old");
        std::fs::create_dir_all(&stale).unwrap();
        let runner = FakeRunner::new();
        healthy_store(&runner, &env);
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);

        let pipeline = BundlePipeline::new(
            tools,
            env.clone(),
            config(),
            vec![
                bundle("charmed-kubernetes", &["k8s"]),
                bundle("openstack", &["operators"]),
            ],
        );
        let report = pipeline.run(&EventSink::disabled()).await;

        assert_eq!(report.outcome(), RunOutcome::Succeeded);
        assert!(!stale.exists());
        assert!(env.workspace.join(SCRATCH_DIR).is_dir());

        let repo_dir = env.workspace.join(REPO_DIR);
        assert_eq!(
            runner.calls_matching("git clone"),
            vec![format!(
                "git clone https://github.com/charmed-kubernetes/bundle {}",
                repo_dir.display()
            )]
        );
        assert_eq!(
            runner.calls_matching(&repo_dir.join("bundle").display().to_string()),
            vec![format!(
                "{} -o {} -c edge k8s/cdk cni/flannel",
                repo_dir.join("bundle").display(),
                env.workspace.join(SCRATCH_DIR).join("charmed-kubernetes").display()
            )]
        );
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.promotions.len(), 1);
        assert!(matches!(
            report.promotions[0].state,
            PromotionState::Released { ref id, .. } if id == "cs:~containers/charmed-kubernetes-1"
        ));
        // Bundles never pre-fetch images or read charm metadata.
        assert!(
            runner
                .calls_matching("charm push")
                .iter()
                .all(|c| !c.contains("--resource"))
        );
    }

    #[tokio::test]
    async fn test_failed_assembly_fails_only_that_bundle() {
        let (_dir, env) = temp_env();
        let runner = FakeRunner::new();
        healthy_store(&runner, &env);
        let script = env.workspace.join(REPO_DIR).join("bundle");
        runner.reply(
            &format!(
                "{} -o {}",
                script.display(),
                env.workspace.join(SCRATCH_DIR).join("broken").display()
            ),
            exit("bundle", 1),
        );
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);

        let report = BundlePipeline::new(
            tools,
            env.clone(),
            config(),
            vec![bundle("broken", &["k8s"]), bundle("healthy", &["k8s"])],
        )
        .run(&EventSink::disabled())
        .await;

        assert_eq!(report.outcome(), RunOutcome::PartiallySucceeded);
        assert!(matches!(
            report.entries[0].state,
            EntryState::Failed { phase: Phase::Assemble, .. }
        ));
        assert!(report.entries[1].state.is_success());
        assert!(matches!(report.promotions[0].state, PromotionState::Skipped { .. }));
        assert!(matches!(report.promotions[1].state, PromotionState::Released { .. }));
    }

    #[tokio::test]
    async fn test_previous_output_is_cleared_before_assembly() {
        let (_dir, env) = temp_env();
        let output_dir = env.workspace.join(SCRATCH_DIR).join("cdk");
        std::fs::create_dir_all(&output_dir).unwrap();
        std::fs::write(output_dir.join("bundle.yaml"), "stale").unwrap();
        let charm_dir = env.build_dir.join("cdk");
        std::fs::create_dir_all(&charm_dir).unwrap();
        std::fs::write(charm_dir.join("metadata.yaml"), "name: cdk\n").unwrap();

        let runner = FakeRunner::new();
        healthy_store(&runner, &env);
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);

        let bundles = vec![bundle("cdk", &["k8s"])];
        let report = BundlePipeline::new(tools, env.clone(), config(), bundles)
            .run(&EventSink::disabled())
            .await;

        assert_eq!(report.outcome(), RunOutcome::Succeeded);
        assert!(!output_dir.join("bundle.yaml").exists());
        assert!(charm_dir.join("metadata.yaml").exists());
        let pushes = runner.calls_matching("charm push");
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].contains(&output_dir.display().to_string()));
    }

    #[tokio::test]
    async fn test_clone_failure_aborts() {
        let (_dir, env) = temp_env();
        let runner = FakeRunner::new();
        runner.reply("git clone", exit("git", 128));
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);

        let report = BundlePipeline::new(tools, env, config(), vec![bundle("cdk", &["k8s"])])
            .run(&EventSink::disabled())
            .await;

        assert_eq!(report.outcome(), RunOutcome::Failed);
        assert_eq!(report.aborted.as_ref().unwrap().phase, Phase::Clone);
        assert!(report.entries.is_empty());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_tools() {
        let (_dir, env) = temp_env();
        let runner = FakeRunner::new();
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);

        let pipeline = BundlePipeline::new(tools, env, config(), vec![bundle("cdk", &["k8s"])]);
        let (mut rx, handle) = pipeline.dry_run(true).execute();
        let report = handle.await.unwrap();

        assert!(runner.calls().is_empty());
        assert!(matches!(
            report.entries[0].state,
            EntryState::Planned { ref detail } if detail.contains("fragments: k8s/cdk cni/flannel")
        ));
        let mut planned = false;
        while let Ok(event) = rx.try_recv() {
            planned |= matches!(event, PipelineEvent::EntryPlanned { .. });
        }
        assert!(planned);
    }
}
