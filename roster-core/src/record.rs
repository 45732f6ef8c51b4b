//! Record shape and loosely-typed request fields.
//!
//! Requests arrive as JSON with whatever the client put in them. The
//! [`RecordFields`] type keeps every field as a raw [`Value`] so that the
//! store can report *which* field is wrong instead of failing the whole
//! body at deserialization time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Record identifier, unique across the whole collection.
pub type RecordId = i64;

/// One entry of the collection.
///
/// `rank` is written as `rank` but read back from `value` or `position`
/// as well, so snapshots from either deployment variant load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub name: String,
    pub group: String,
    #[serde(alias = "value", alias = "position")]
    pub rank: i64,
}

/// Raw fields of an add/update request body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordFields {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub group: Option<Value>,
    #[serde(default, alias = "value", alias = "position")]
    pub rank: Option<Value>,
}

impl RecordFields {
    /// Fields for an add request.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(Value::String(name.into())),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(Value::from(id));
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(Value::String(group.into()));
        self
    }

    pub fn with_rank(mut self, rank: i64) -> Self {
        self.rank = Some(Value::from(rank));
        self
    }

    /// The group named by the request, if it is text.
    pub fn group_name(&self) -> Result<&str, StoreError> {
        match &self.group {
            Some(Value::String(group)) => Ok(group.as_str()),
            Some(other) => Err(StoreError::InvalidGroup(other.to_string())),
            None => Err(StoreError::InvalidGroup(String::new())),
        }
    }

    /// Required, non-empty text.
    pub fn name(&self) -> Result<String, StoreError> {
        match &self.name {
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(name.clone()),
            Some(Value::String(_)) => Err(StoreError::field("name", "must not be empty")),
            Some(_) => Err(StoreError::field("name", "must be text")),
            None => Err(StoreError::field("name", "is required")),
        }
    }

    /// Optional numeric rank; `None` means the engine assigns one.
    pub fn rank(&self) -> Result<Option<i64>, StoreError> {
        match &self.rank {
            None => Ok(None),
            Some(value) => integer(value)
                .map(Some)
                .ok_or_else(|| StoreError::field("rank", format!("must be numeric, got {value}"))),
        }
    }

    /// Required positive integer id.
    pub fn id(&self) -> Result<RecordId, StoreError> {
        let value = self
            .id
            .as_ref()
            .ok_or_else(|| StoreError::field("id", "is required"))?;
        match integer(value) {
            Some(id) if id > 0 => Ok(id),
            _ => Err(StoreError::field("id", format!("must be a positive integer, got {value}"))),
        }
    }
}

/// Integer view of a JSON value.
///
/// Accepts integers, integral floats (`3.0`) and numeric strings (`"3"`),
/// which is what HTML forms and loosely-typed clients tend to send.
pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
