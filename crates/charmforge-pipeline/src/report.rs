//! Run events and the run report.

use charmforge_core::{Channel, Entity, PublishedArtifact, RunId};
use charmforge_executor::AttemptRecord;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::Serialize;
use tokio::sync::mpsc;

/// Step of the pipeline a unit of work was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[display("layer resolution")]
    Layers,
    #[display("workspace preparation")]
    Prepare,
    #[display("clone")]
    Clone,
    #[display("build")]
    Build,
    #[display("proof")]
    Validate,
    #[display("bundle assembly")]
    Assemble,
    #[display("publish")]
    Publish,
    #[display("revision stamp")]
    Stamp,
    #[display("resource attach")]
    Attach,
}

/// Which manifest a run worked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    #[display("charms")]
    Charms,
    #[display("bundles")]
    Bundles,
}

/// Final state of one selected charm or bundle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    Succeeded { artifact: PublishedArtifact },
    Failed { phase: Phase, message: String },
    /// Dry run: what would have happened.
    Planned { detail: String },
}

impl EntryState {
    pub fn is_success(&self) -> bool {
        matches!(self, EntryState::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EntryState::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub entity: Entity,
    #[serde(flatten)]
    pub state: EntryState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PromotionState {
    Released { id: String, resources: Vec<String> },
    Failed { message: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub entity: Entity,
    pub from: Channel,
    pub to: Channel,
    #[serde(flatten)]
    pub state: PromotionState,
}

impl PromotionReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.state, PromotionState::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum RunOutcome {
    Succeeded,
    PartiallySucceeded,
    Failed,
}

/// A phase-fatal failure that stopped the run before per-entry work.
#[derive(Debug, Clone, Serialize)]
pub struct AbortReport {
    pub phase: Phase,
    pub message: String,
}

/// Everything that happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub kind: RunKind,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub aborted: Option<AbortReport>,
    pub entries: Vec<EntryReport>,
    pub promotions: Vec<PromotionReport>,
}

impl RunReport {
    pub fn new(kind: RunKind, dry_run: bool) -> Self {
        Self {
            run_id: RunId::new(),
            kind,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            aborted: None,
            entries: Vec::new(),
            promotions: Vec::new(),
        }
    }

    pub fn abort(&mut self, phase: Phase, message: impl Into<String>) {
        self.aborted = Some(AbortReport {
            phase,
            message: message.into(),
        });
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Failed when the run aborted or nothing selected succeeded;
    /// partially succeeded when some entry or promotion failed.
    pub fn outcome(&self) -> RunOutcome {
        if self.aborted.is_some() {
            return RunOutcome::Failed;
        }
        let failed = self.entries.iter().filter(|e| e.state.is_failure()).count();
        if failed > 0 && failed == self.entries.len() {
            return RunOutcome::Failed;
        }
        if failed > 0 || self.promotions.iter().any(PromotionReport::is_failure) {
            return RunOutcome::PartiallySucceeded;
        }
        RunOutcome::Succeeded
    }

    /// Successfully published entries.
    pub fn published(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| e.state.is_success())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Progress emitted while a run executes.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted { run_id: RunId, kind: RunKind },
    LayerResolved { layer: String },
    EntryStarted { name: String },
    EntryPhase { name: String, phase: Phase },
    EntryPlanned { name: String, detail: String },
    EntryCompleted { name: String, success: bool },
    Attempt(AttemptRecord),
    PromotionCompleted { entity: Entity, success: bool },
    RunCompleted { outcome: RunOutcome },
}

/// Sender half of the event stream. Disabled sinks drop every event.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::UnboundedSender<PipelineEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0 {
            // Receiver gone means nobody is watching; the run continues.
            let _ = tx.send(event);
        }
    }
}
