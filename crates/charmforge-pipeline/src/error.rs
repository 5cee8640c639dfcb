//! Errors tagged with the pipeline phase they happened in.

use charmforge_core::Error;
use thiserror::Error;

use crate::report::Phase;

/// A failure of one unit of work, with enough context to re-run just that
/// unit.
#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: Error,
}

impl PhaseError {
    pub fn new(phase: Phase, source: impl Into<Error>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }
}

/// Attach a phase to a fallible step.
pub(crate) trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseError>;
}

impl<T, E: Into<Error>> InPhase<T> for Result<T, E> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseError> {
        self.map_err(|e| PhaseError::new(phase, e))
    }
}
