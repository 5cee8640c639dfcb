//! Core domain types and traits for the charmforge build pipeline.
//!
//! This crate contains:
//! - Component, bundle and layer specifications
//! - Store entities, channels and published artifacts
//! - Tag filtering
//! - Retry policies and failure classification
//! - The tool-runner seam every external program is reached through

pub mod component;
pub mod error;
pub mod id;
pub mod retry;
pub mod tags;
pub mod tool;

pub use component::{
    BuildResult, BundleSpec, Channel, ComponentSpec, Entity, LayerKind, LayerRef,
    PublishedArtifact, ResourceBinding,
};
pub use error::{Error, Result};
pub use id::RunId;
pub use retry::{FailureClass, RetryPolicy};
pub use tags::TagFilter;
pub use tool::{ImagePuller, LogStream, ToolError, ToolInvocation, ToolOutput, ToolResult, ToolRunner};
