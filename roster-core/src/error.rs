use crate::record::RecordId;

/// Validation and lookup failures raised by [`CollectionStore`](crate::CollectionStore).
///
/// Every variant is detected before the store is touched, so an `Err`
/// always means the collection is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Group missing from the request or not part of the declared set
    #[error("unknown or missing group {0:?}")]
    InvalidGroup(String),
    /// A single field is absent or has the wrong semantic type
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    /// A bulk payload does not match the record shape
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    /// No record carries this id
    #[error("record {0} not found")]
    NotFound(RecordId),
    /// The highest `id`/`rank` in use leaves no room for a successor
    #[error("no {0} left: the highest value in use is i64::MAX")]
    Exhausted(&'static str),
}

impl StoreError {
    /// Stable machine-readable kind, surfaced to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::InvalidGroup(_) => "InvalidGroup",
            StoreError::InvalidField { .. } => "InvalidField",
            StoreError::InvalidShape(_) => "InvalidShape",
            StoreError::NotFound(_) => "NotFound",
            StoreError::Exhausted(_) => "Exhausted",
        }
    }

    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
