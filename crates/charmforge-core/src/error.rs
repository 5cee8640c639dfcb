//! Error types for charmforge.

use thiserror::Error;

use crate::tool::ToolError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient tool failure: {0}")]
    TransientToolFailure(ToolError),

    #[error("tool failure: {0}")]
    FatalToolFailure(ToolError),

    #[error("unknown layer kind: {0}")]
    UnknownLayerKind(String),

    #[error("unable to determine resource spec for {0}")]
    MissingResourceSpec(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        operation: String,
        attempts: u32,
        last: Box<Error>,
    },

    #[error("malformed output from {program}: {message}")]
    MalformedOutput { program: String, message: String },

    #[error("published {url} but could not stamp revision: {source}")]
    StampFailed { url: String, source: Box<Error> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed(program: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MalformedOutput {
            program: program.into(),
            message: message.into(),
        }
    }

    /// The tool failure underneath this error, if there is one.
    pub fn tool_error(&self) -> Option<&ToolError> {
        match self {
            Error::TransientToolFailure(e) | Error::FatalToolFailure(e) => Some(e),
            Error::ExhaustedRetries { last, .. } | Error::StampFailed { source: last, .. } => {
                last.tool_error()
            }
            _ => None,
        }
    }
}

impl From<ToolError> for Error {
    fn from(e: ToolError) -> Self {
        Error::FatalToolFailure(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
