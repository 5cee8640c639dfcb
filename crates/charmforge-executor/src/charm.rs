//! Client for the `charm` build and store tool.

use charmforge_core::{
    Channel, Entity, Error, LayerRef, Result, ToolError, ToolInvocation, ToolOutput, ToolResult,
    ToolRunner,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::debug;

const PROGRAM: &str = "charm";

// Terminal escape sequences the store client emits while pushing images.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

static ATTACH_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\brevision\s+(\d+)").unwrap());

/// A resource attached to a store entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResource {
    pub name: String,
    pub revision: i64,
}

impl StoreResource {
    /// `name-revision`, the form `release --resource` expects.
    pub fn release_arg(&self) -> String {
        format!("{}-{}", self.name, self.revision)
    }
}

#[derive(Deserialize)]
struct PushResponse {
    url: String,
}

#[derive(Deserialize)]
struct ShowIdResponse {
    id: ShowId,
}

#[derive(Deserialize)]
struct ShowId {
    #[serde(rename = "Id")]
    id: String,
}

/// Typed calls into the charm tool. Every invocation carries the build
/// environment so the tool finds the layer caches and build directory.
#[derive(Clone)]
pub struct CharmTool {
    runner: Arc<dyn ToolRunner>,
    program: String,
    env: BTreeMap<String, String>,
}

impl std::fmt::Debug for CharmTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharmTool")
            .field("program", &self.program)
            .finish()
    }
}

impl CharmTool {
    pub fn new(runner: Arc<dyn ToolRunner>, env: BTreeMap<String, String>) -> Self {
        Self {
            runner,
            program: PROGRAM.to_string(),
            env,
        }
    }

    fn command(&self, subcommand: &str) -> ToolInvocation {
        ToolInvocation::new(&self.program)
            .arg(subcommand)
            .envs(&self.env)
    }

    /// Download a layer or interface from the layer index into the caches.
    pub async fn pull_source(&self, index: &str, layer: &LayerRef) -> ToolResult<ToolOutput> {
        let inv = self
            .command("pull-source")
            .args(["-v", "-i", index])
            .arg(layer.to_string());
        self.runner.run(&inv).await
    }

    /// Build the charm whose source is in `source_dir`.
    pub async fn build(&self, source_dir: &Path) -> ToolResult<ToolOutput> {
        let inv = self
            .command("build")
            .args(["-r", "--force"])
            .current_dir(source_dir);
        self.runner.run(&inv).await
    }

    /// Lint a built charm.
    pub async fn proof(&self, artifact_dir: &Path) -> ToolResult<ToolOutput> {
        let inv = self.command("proof").current_dir(artifact_dir);
        self.runner.run(&inv).await
    }

    /// Push a built charm or bundle and return the published URL. Each
    /// resource binding is `(name, image reference)`.
    pub async fn push(
        &self,
        artifact_dir: &Path,
        entity: &Entity,
        resources: &[(String, String)],
    ) -> Result<String> {
        let mut inv = self
            .command("push")
            .arg(artifact_dir.to_string_lossy())
            .arg(entity.to_string());
        for (name, image) in resources {
            inv = inv.arg("--resource").arg(format!("{}={}", name, image));
        }
        let output = self.runner.run(&inv).await?;
        debug!(entity = %entity, "Charm push returned: {}", output.stdout.trim());
        parse_push_url(&output.stdout)
    }

    /// Record the source commit on a published entity.
    pub async fn set_commit(&self, url: &str, commit: &str) -> ToolResult<()> {
        let inv = self
            .command("set")
            .arg(url)
            .arg(format!("commit={}", commit));
        self.runner.run(&inv).await.map(|_| ())
    }

    /// Canonical id of `entity` at `channel`, e.g. `cs:~ns/etcd-12`.
    pub async fn show_id(&self, entity: &Entity, channel: &Channel) -> Result<String> {
        let inv = self
            .command("show")
            .arg(entity.to_string())
            .args(["--channel", channel.as_str(), "id"]);
        let output = self.runner.run(&inv).await?;
        parse_show_id(&output.stdout)
    }

    /// Resources attached to `id` at `channel`. `None` when the tool reports
    /// that the entity has no resources at all.
    pub async fn list_resources(
        &self,
        id: &str,
        channel: &Channel,
    ) -> Result<Option<Vec<StoreResource>>> {
        let inv = self
            .command("list-resources")
            .arg(id)
            .args(["--channel", channel.as_str(), "--format", "yaml"]);
        match self.runner.run(&inv).await {
            Ok(output) => parse_resource_list(&output.stdout).map(Some),
            Err(e) if is_no_resources(&e) => {
                debug!(id, "No resources for entity");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Attach a local file as resource `key`.
    pub async fn attach(
        &self,
        entity: &Entity,
        channel: &Channel,
        key: &str,
        path: &Path,
    ) -> ToolResult<ToolOutput> {
        let inv = self
            .command("attach")
            .arg(entity.to_string())
            .args(["--channel", channel.as_str()])
            .arg(format!("{}={}", key, path.display()));
        self.runner.run(&inv).await
    }

    /// Release `id` to `channel` with the given resource revisions.
    pub async fn release(
        &self,
        id: &str,
        channel: &Channel,
        resources: &[StoreResource],
    ) -> ToolResult<()> {
        let mut inv = self
            .command("release")
            .arg(id)
            .args(["--channel", channel.as_str()]);
        for resource in resources {
            inv = inv.arg("--resource").arg(resource.release_arg());
        }
        self.runner.run(&inv).await.map(|_| ())
    }
}

/// The "entity has no resources" failure shape of `list-resources`.
pub fn is_no_resources(error: &ToolError) -> bool {
    error.is_generic_failure()
}

/// Published URL from push output. Only the first line is structured; the
/// rest is progress chatter from image uploads.
pub fn parse_push_url(stdout: &str) -> Result<String> {
    let cleaned = ANSI_ESCAPE.replace_all(stdout, "");
    let first = cleaned
        .trim()
        .lines()
        .next()
        .ok_or_else(|| Error::malformed(PROGRAM, "push returned no output"))?;
    let response: PushResponse = serde_yaml::from_str(first)
        .map_err(|e| Error::malformed(PROGRAM, format!("push response {:?}: {}", first, e)))?;
    Ok(response.url)
}

pub fn parse_show_id(stdout: &str) -> Result<String> {
    let response: ShowIdResponse = serde_yaml::from_str(stdout)
        .map_err(|e| Error::malformed(PROGRAM, format!("show id response: {}", e)))?;
    Ok(response.id.id)
}

pub fn parse_resource_list(stdout: &str) -> Result<Vec<StoreResource>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let resources: Option<Vec<StoreResource>> = serde_yaml::from_str(stdout)
        .map_err(|e| Error::malformed(PROGRAM, format!("list-resources response: {}", e)))?;
    Ok(resources.unwrap_or_default())
}

/// Store revision reported by `attach`, if the output names one.
pub fn parse_attach_revision(output: &str) -> Option<u32> {
    ATTACH_REVISION
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_push_url_from_first_line() {
        let stdout = "url: cs:~ns/mycharm-3\nchannel: unpublished\n\
                      \x1b[1A\x1b[2KPushing image layer 3/7\nsha256:abcd: Pushed\n";
        assert_eq!(parse_push_url(stdout).unwrap(), "cs:~ns/mycharm-3");
    }

    #[test]
    fn test_push_url_strips_escape_sequences() {
        let stdout = "\x1b[0m\nurl: cs:~ns/mycharm-4\x1b[K\n";
        assert_eq!(parse_push_url(stdout).unwrap(), "cs:~ns/mycharm-4");
    }

    #[test]
    fn test_push_without_url_is_malformed() {
        assert!(matches!(
            parse_push_url("Pushing...\n"),
            Err(Error::MalformedOutput { .. })
        ));
        assert!(matches!(
            parse_push_url(""),
            Err(Error::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_parse_show_id() {
        let stdout = "id:\n  Id: cs:~containers/etcd-431\n  Name: etcd\n  Revision: 431\n";
        assert_eq!(parse_show_id(stdout).unwrap(), "cs:~containers/etcd-431");
    }

    #[test]
    fn test_parse_resource_list() {
        let stdout = "- name: snapshot\n  revision: 2\n  type: file\n- name: core\n  revision: 0\n";
        let resources = parse_resource_list(stdout).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].release_arg(), "snapshot-2");
        assert_eq!(resources[1].release_arg(), "core-0");
        assert!(parse_resource_list("[]\n").unwrap().is_empty());
        assert!(parse_resource_list("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_attach_revision() {
        assert_eq!(
            parse_attach_revision("uploaded revision 7 of cni-amd64"),
            Some(7)
        );
        assert_eq!(parse_attach_revision("done"), None);
    }

    struct Recorder {
        calls: Mutex<Vec<ToolInvocation>>,
        reply: ToolResult<ToolOutput>,
    }

    #[async_trait]
    impl ToolRunner for Recorder {
        async fn run(&self, invocation: &ToolInvocation) -> ToolResult<ToolOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            self.reply.clone()
        }
    }

    fn tool(reply: ToolResult<ToolOutput>) -> (CharmTool, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
            reply,
        });
        let env = BTreeMap::from([("CHARM_BUILD_DIR".to_string(), "/w/build".to_string())]);
        (CharmTool::new(recorder.clone(), env), recorder)
    }

    #[tokio::test]
    async fn test_push_invocation_binds_resources() {
        let (charm, recorder) = tool(Ok(ToolOutput::stdout("url: cs:~ns/etcd-1\n")));
        let url = charm
            .push(
                Path::new("/w/build/etcd"),
                &Entity::new("ns", "etcd"),
                &[("etcd-image".to_string(), "rocks/etcd:3.5".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(url, "cs:~ns/etcd-1");
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            calls[0].display(),
            "charm push /w/build/etcd cs:~ns/etcd --resource etcd-image=rocks/etcd:3.5"
        );
        assert_eq!(calls[0].env.get("CHARM_BUILD_DIR").unwrap(), "/w/build");
    }

    #[tokio::test]
    async fn test_list_resources_no_resources_shape() {
        let (charm, _) = tool(Err(ToolError::NonZeroExit {
            program: "charm".to_string(),
            code: Some(1),
            output: "ERROR no resources".to_string(),
        }));
        let listed = charm
            .list_resources("cs:~ns/etcd-1", &Channel::unpublished())
            .await
            .unwrap();
        assert_eq!(listed, None);
    }

    #[tokio::test]
    async fn test_list_resources_other_failure_is_fatal() {
        let (charm, _) = tool(Err(ToolError::NonZeroExit {
            program: "charm".to_string(),
            code: Some(2),
            output: "usage".to_string(),
        }));
        let err = charm
            .list_resources("cs:~ns/etcd-1", &Channel::unpublished())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FatalToolFailure(_)));
    }

    #[tokio::test]
    async fn test_release_arguments() {
        let (charm, recorder) = tool(Ok(ToolOutput::default()));
        charm
            .release(
                "cs:~ns/etcd-1",
                &Channel::edge(),
                &[StoreResource {
                    name: "snapshot".to_string(),
                    revision: 2,
                }],
            )
            .await
            .unwrap();

        assert_eq!(
            recorder.calls.lock().unwrap()[0].display(),
            "charm release cs:~ns/etcd-1 --channel edge --resource snapshot-2"
        );
    }
}
