pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("conflicting write to {kind} {name:?}: expected version {expected}, found {found}")]
    Conflict {
        kind: &'static str,
        name: String,
        expected: u64,
        found: u64,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// === impl StoreError ===

impl StoreError {
    pub fn not_found(kind: &'static str, name: impl ToString) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
