use thiserror::Error;

/// The three kinds of entity the core addresses by string id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Service,
    Node,
    Chain,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Service => write!(f, "service"),
            EntityKind::Node => write!(f, "node"),
            EntityKind::Chain => write!(f, "chain"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("service '{service}' does not fit on node '{node}'")]
    CapacityExceeded { service: String, node: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound { kind, id: id.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
