use thiserror::Error;

/// Errors surfaced by the registry model and engine.
///
/// Schema and parameter problems are hard failures that name exactly what is
/// missing or out of domain. Malformed individual records never surface here;
/// preprocessing drops them or substitutes the field's unknown sentinel.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("missing required relations: {}", missing.join(", "))]
    MissingRelations { missing: Vec<String> },

    #[error("relation {relation} is missing required columns: {}", columns.join(", "))]
    MissingColumns {
        relation: String,
        columns: Vec<String>,
    },

    #[error("invalid {field} value {value:?}; allowed: [{}]", allowed.join(", "))]
    InvalidParameter {
        field: &'static str,
        value: String,
        allowed: Vec<String>,
    },

    #[error("invalid subject id {0:?}")]
    InvalidSubjectId(String),

    #[error("invalid ATC code {0:?}")]
    InvalidAtcCode(String),

    #[error("failed to read relation {relation}: {message}")]
    Ingest { relation: String, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Parameter rejection carrying the offending value and the allowed set.
    pub fn parameter(
        field: &'static str,
        value: impl Into<String>,
        allowed: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::InvalidParameter {
            field,
            value: value.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
