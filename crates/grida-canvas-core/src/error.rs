//! Error types shared across the engine.

use thiserror::Error;

use crate::config::ConfigError;
use crate::io::{ArchiveError, SvgError};
use crate::node::NodeId;
use crate::storage::StorageError;

/// Errors raised by the command engine.
///
/// A command that fails leaves the document exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid parent: {0}")]
    InvalidParent(String),
    #[error("target not found: {0}")]
    TargetNotFound(NodeId),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
}

impl CommandError {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub(crate) fn invalid_parent(msg: impl Into<String>) -> Self {
        Self::InvalidParent(msg.into())
    }
}

/// Errors raised by the collaboration layer. All of them are recoverable:
/// local editing continues while the session is degraded.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync connection lost")]
    ConnectionLost,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("crdt error: {0}")]
    Crdt(String),
}

impl From<loro::LoroError> for SyncError {
    fn from(err: loro::LoroError) -> Self {
        Self::Crdt(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors raised while loading a document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A newer load superseded this one; its result was discarded.
    #[error("load aborted: superseded by a newer load")]
    Aborted,
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Top-level error for the [`Editor`](crate::editor::Editor) facade.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Svg(#[from] SvgError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError::TargetNotFound(NodeId::from("0-7"));
        assert_eq!(err.to_string(), "target not found: 0-7");
        let err = CommandError::precondition("scene accepts a single child");
        assert!(err.to_string().contains("single child"));
    }

    #[test]
    fn test_editor_error_from_command() {
        let err: EditorError = CommandError::invalid_parent("missing").into();
        assert!(matches!(err, EditorError::Command(CommandError::InvalidParent(_))));
    }
}
