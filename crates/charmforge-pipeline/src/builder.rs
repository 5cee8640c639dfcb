//! Source checkout, build and proof of a single charm.

use charmforge_config::{CharmEnv, CharmsConfig};
use charmforge_core::{BuildResult, ComponentSpec, Error};
use tracing::info;

use crate::error::{InPhase, PhaseError};
use crate::report::{EventSink, Phase, PipelineEvent};
use crate::toolchain::Toolchain;

pub struct ComponentBuilder<'a> {
    tools: &'a Toolchain,
    env: &'a CharmEnv,
    config: &'a CharmsConfig,
    events: EventSink,
}

impl<'a> ComponentBuilder<'a> {
    pub fn new(tools: &'a Toolchain, env: &'a CharmEnv, config: &'a CharmsConfig) -> Self {
        Self {
            tools,
            env,
            config,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    fn enter(&self, spec: &ComponentSpec, phase: Phase) {
        self.events.emit(PipelineEvent::EntryPhase {
            name: spec.name.clone(),
            phase,
        });
    }

    /// Clone the downstream repository into a fresh `<workspace>/<name>`,
    /// build it into `<build_dir>/<name>` and proof the result.
    pub async fn build(&self, spec: &ComponentSpec) -> Result<BuildResult, PhaseError> {
        self.enter(spec, Phase::Prepare);
        let downstream = spec.downstream.as_deref().ok_or_else(|| {
            PhaseError::new(
                Phase::Prepare,
                Error::Configuration(format!("{} has no downstream repository", spec.name)),
            )
        })?;
        let url = self
            .config
            .downstream_url(downstream)
            .in_phase(Phase::Prepare)?;

        let source_path = self.env.workspace.join(&spec.name);
        if tokio::fs::try_exists(&source_path)
            .await
            .in_phase(Phase::Prepare)?
        {
            tokio::fs::remove_dir_all(&source_path)
                .await
                .in_phase(Phase::Prepare)?;
        }
        tokio::fs::create_dir_all(&source_path)
            .await
            .in_phase(Phase::Prepare)?;

        self.enter(spec, Phase::Clone);
        info!(charm = %spec.name, url = %url, branch = %self.config.charm_branch, "Cloning charm source");
        self.tools
            .git
            .clone_repo(url.as_str(), Some(&self.config.charm_branch), &source_path)
            .await
            .in_phase(Phase::Clone)?;

        self.enter(spec, Phase::Build);
        info!(charm = %spec.name, "Building charm");
        self.tools
            .charm
            .build(&source_path)
            .await
            .in_phase(Phase::Build)?;

        let artifact_path = self.env.build_dir.join(&spec.name);
        self.enter(spec, Phase::Validate);
        self.tools
            .charm
            .proof(&artifact_path)
            .await
            .in_phase(Phase::Validate)?;

        Ok(BuildResult {
            name: spec.name.clone(),
            resource_builder: spec
                .resource_build_sh
                .as_ref()
                .map(|script| source_path.join(script)),
            source_path,
            artifact_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeImages, FakeRunner, charms_config, exit, temp_env, toolchain};
    use std::sync::Arc;

    fn spec(name: &str) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            namespace: "containers".to_string(),
            upstream: None,
            downstream: Some(format!("charmed-kubernetes/charm-{}", name)),
            tags: vec!["k8s".to_string()],
            resource_build_sh: Some("build-resources.sh".to_string()),
        }
    }

    #[tokio::test]
    async fn test_build_sequence() {
        let (_dir, env) = temp_env();
        let runner = FakeRunner::new();
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);
        let config = charms_config();

        let stale = env.workspace.join("etcd").join("stale.txt");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        let result = ComponentBuilder::new(&tools, &env, &config)
            .build(&spec("etcd"))
            .await
            .unwrap();

        assert!(!stale.exists());
        assert_eq!(result.source_path, env.workspace.join("etcd"));
        assert_eq!(result.artifact_path, env.build_dir.join("etcd"));
        assert_eq!(
            result.resource_builder,
            Some(env.workspace.join("etcd").join("build-resources.sh"))
        );

        let calls = runner.calls();
        assert_eq!(
            calls[0].display(),
            format!(
                "git clone --branch master https://github.com/charmed-kubernetes/charm-etcd {}",
                env.workspace.join("etcd").display()
            )
        );
        assert_eq!(calls[1].display(), "charm build -r --force");
        assert_eq!(calls[1].cwd.as_deref(), Some(result.source_path.as_path()));
        assert_eq!(calls[1].env["CHARM_BUILD_DIR"], env.build_dir.to_string_lossy());
        assert_eq!(calls[2].display(), "charm proof");
        assert_eq!(calls[2].cwd.as_deref(), Some(result.artifact_path.as_path()));
    }

    #[tokio::test]
    async fn test_build_failure_is_tagged_and_skips_proof() {
        let (_dir, env) = temp_env();
        let runner = FakeRunner::new();
        runner.reply("charm build", exit("charm", 1));
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);
        let config = charms_config();

        let err = ComponentBuilder::new(&tools, &env, &config)
            .build(&spec("etcd"))
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Build);
        assert!(runner.calls_matching("charm proof").is_empty());
    }

    #[tokio::test]
    async fn test_missing_downstream_is_configuration_error() {
        let (_dir, env) = temp_env();
        let runner = FakeRunner::new();
        let tools = toolchain(&runner, &Arc::new(FakeImages::default()), &env);
        let config = charms_config();
        let mut spec = spec("etcd");
        spec.downstream = None;

        let err = ComponentBuilder::new(&tools, &env, &config)
            .build(&spec)
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Prepare);
        assert!(matches!(err.source, Error::Configuration(_)));
        assert!(runner.calls().is_empty());
    }
}
