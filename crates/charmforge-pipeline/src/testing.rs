//! Scripted tool fakes for pipeline tests.

use async_trait::async_trait;
use charmforge_config::{CharmEnv, CharmsConfig, RetrySettings};
use charmforge_core::{
    Channel, ComponentSpec, ImagePuller, TagFilter, ToolError, ToolInvocation, ToolOutput,
    ToolResult, ToolRunner,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::toolchain::Toolchain;

type Matcher = Box<dyn Fn(&ToolInvocation) -> bool + Send + Sync>;
/// Gets the invocation and how many times this rule matched before.
type Responder = Box<dyn Fn(&ToolInvocation, usize) -> ToolResult<ToolOutput> + Send + Sync>;

struct Rule {
    matches: Matcher,
    respond: Responder,
    hits: usize,
}

/// Records every invocation and answers from rules. The most recently added
/// matching rule wins; unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond<M, R>(&self, matches: M, respond: R)
    where
        M: Fn(&ToolInvocation) -> bool + Send + Sync + 'static,
        R: Fn(&ToolInvocation, usize) -> ToolResult<ToolOutput> + Send + Sync + 'static,
    {
        self.rules.lock().unwrap().push(Rule {
            matches: Box::new(matches),
            respond: Box::new(respond),
            hits: 0,
        });
    }

    /// Always answer invocations starting with `prefix` with `reply`.
    pub fn reply(&self, prefix: &str, reply: ToolResult<ToolOutput>) {
        self.respond(starts_with(prefix), move |_, _| reply.clone());
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered invocations starting with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .iter()
            .map(ToolInvocation::display)
            .filter(|d| d.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation) -> ToolResult<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().rev().find(|r| (r.matches)(invocation)) {
            Some(rule) => {
                let hit = rule.hits;
                rule.hits += 1;
                (rule.respond)(invocation, hit)
            }
            None => Ok(ToolOutput::default()),
        }
    }
}

pub fn starts_with(prefix: &str) -> impl Fn(&ToolInvocation) -> bool + Send + Sync + 'static {
    let prefix = prefix.to_string();
    move |inv| inv.display().starts_with(&prefix)
}

pub fn ok(stdout: &str) -> ToolResult<ToolOutput> {
    Ok(ToolOutput::stdout(stdout))
}

pub fn exit(program: &str, code: i32) -> ToolResult<ToolOutput> {
    Err(ToolError::NonZeroExit {
        program: program.to_string(),
        code: Some(code),
        output: format!("{} failed", program),
    })
}

/// Records pulls; images in `failing` fail with a daemon error.
#[derive(Default)]
pub struct FakeImages {
    pub pulled: Mutex<Vec<String>>,
    pub failing: HashSet<String>,
}

#[async_trait]
impl ImagePuller for FakeImages {
    async fn pull(&self, image: &str) -> ToolResult<()> {
        self.pulled.lock().unwrap().push(image.to_string());
        if self.failing.contains(image) {
            return Err(ToolError::Daemon {
                service: "docker".to_string(),
                message: format!("pull {} denied", image),
            });
        }
        Ok(())
    }
}

/// Build environment rooted in a temporary directory.
pub fn temp_env() -> (TempDir, CharmEnv) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let env = CharmEnv {
        build_dir: root.join("build"),
        layers_dir: root.join("layers"),
        interfaces_dir: root.join("interfaces"),
        workspace: root.join("workspace"),
    };
    for path in [&env.build_dir, &env.layers_dir, &env.interfaces_dir, &env.workspace] {
        std::fs::create_dir_all(path).unwrap();
    }
    (dir, env)
}

pub fn toolchain(runner: &Arc<FakeRunner>, images: &Arc<FakeImages>, env: &CharmEnv) -> Toolchain {
    Toolchain::new(runner.clone(), images.clone(), env.tool_env())
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Script the store side of a healthy run. `charm build` writes a
/// metadata.yaml without resources into the build output of the charm whose
/// source it runs in; pushes answer with revision 1 of the pushed entity.
pub fn healthy_store(runner: &FakeRunner, env: &CharmEnv) {
    let build_dir = env.build_dir.clone();
    runner.respond(starts_with("charm build"), move |inv, _| {
        let name = inv
            .cwd
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        write_file(
            &build_dir.join(&name).join("metadata.yaml"),
            &format!("name: {}\n", name),
        );
        Ok(ToolOutput::default())
    });
    runner.reply("git rev-parse", ok("0123abcd\n"));
    runner.respond(starts_with("charm push"), |inv, _| {
        let entity = inv.args.get(2).cloned().unwrap_or_default();
        ok(&format!("url: {}-1\nchannel: unpublished\n", entity))
    });
    runner.respond(starts_with("charm show"), |inv, _| {
        let entity = inv.args.get(1).cloned().unwrap_or_default();
        ok(&format!("id:\n  Id: {}-1\n", entity))
    });
    runner.reply("charm list-resources", exit("charm", 1));
}

pub fn charms_config() -> CharmsConfig {
    CharmsConfig {
        charm_branch: "master".to_string(),
        to_channel: Channel::edge(),
        filter: TagFilter::parse("k8s"),
        list: PathBuf::from("charms.yaml"),
        resource_spec: None,
        layers: None,
        git_base_url: "https://github.com/".parse().unwrap(),
        retry: RetrySettings::default(),
    }
}

pub fn component(name: &str, tags: &[&str]) -> ComponentSpec {
    ComponentSpec {
        name: name.to_string(),
        namespace: "containers".to_string(),
        upstream: None,
        downstream: Some(format!("charmed-kubernetes/charm-{}", name)),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        resource_build_sh: None,
    }
}
