//! Error type shared by synthesis, parsing, and the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while building or persisting a template.
///
/// Provisioning-time failures (name collisions, quotas, missing secrets) are
/// reported by CloudFormation and never surface here.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("logical ID '{0}' must be non-empty and alphanumeric")]
    InvalidLogicalId(String),

    #[error("logical ID '{0}' is already declared in this stack")]
    DuplicateLogicalId(String),

    #[error("resource '{from}' references undeclared resource '{target}'")]
    UnknownReference { from: String, target: String },

    #[error("dependency cycle detected involving: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("no resource named '{0}' in this stack")]
    UnknownResource(String),

    #[error("role '{role}' already carries a build-diagnostics statement for a different project set")]
    PermissionPatchConflict { role: String },

    #[error("{} validation error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SynthError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SynthError>;
