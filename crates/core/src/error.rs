use std::fmt;

use thiserror::Error;

/// Kinds of objects the registry reconciler creates and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Pod,
    Service,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Pod => f.write_str("pod"),
            ObjectKind::Service => f.write_str("service"),
        }
    }
}

/// Mutation failures while converging a registry server. Lookups never fail this way.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("error creating {kind}: {name}")]
    ResourceCreate {
        kind: ObjectKind,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("error deleting {kind}: {name}")]
    ResourceDelete {
        kind: ObjectKind,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ReconcileError::ResourceCreate { kind, .. } | ReconcileError::ResourceDelete { kind, .. } => *kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ReconcileError::ResourceCreate { name, .. } | ReconcileError::ResourceDelete { name, .. } => name,
        }
    }
}
