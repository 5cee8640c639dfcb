//! Build pipeline orchestration for charmforge.
//!
//! Resolves layers, builds, publishes and attaches resources for every
//! selected charm, assembles and publishes bundles, and promotes what was
//! published. Runs are strictly sequential within one process.

pub mod builder;
pub mod bundles;
pub mod error;
pub mod layers;
pub mod orchestrator;
pub mod promoter;
pub mod publisher;
pub mod report;
pub mod resources;
pub mod toolchain;

#[cfg(test)]
mod testing;

pub use builder::ComponentBuilder;
pub use bundles::BundlePipeline;
pub use error::PhaseError;
pub use layers::LayerResolver;
pub use orchestrator::{CharmInputs, CharmPipeline};
pub use promoter::{PromotionTarget, Promoter};
pub use publisher::Publisher;
pub use report::{
    EntryReport, EntryState, EventSink, Phase, PipelineEvent, PromotionReport, PromotionState,
    RunKind, RunOutcome, RunReport,
};
pub use resources::ResourceAttacher;
pub use toolchain::Toolchain;
