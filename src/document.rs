//! The per-post JSON document written under the `attachments` meta key.
//!
//! Shape: `{ "<instance>": [ { "id": .., "fields": { .. } }, .. ], .. }`.
//! Existing records are carried through untouched, so anything a later
//! plugin version added to them survives a migration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored document is not a JSON object")]
    NotAnObject,
    #[error("instance `{0}` is not a list of attachments")]
    NotAList(String),
}

/// A converted attachment ready to be appended to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Value,
    pub fields: Map<String, Value>,
}

impl Attachment {
    pub fn new(id: impl Into<Value>) -> Self {
        Attachment {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    fn into_value(self) -> Value {
        let mut record = Map::with_capacity(2);
        record.insert("id".to_string(), self.id);
        record.insert("fields".to_string(), Value::Object(self.fields));
        Value::Object(record)
    }
}

/// Instances are kept as raw JSON values; only the instance being appended
/// to has to be a list, every other key is written back as it was read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AttachmentsDocument {
    instances: IndexMap<String, Value>,
}

impl AttachmentsDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        let Value::Object(map) = serde_json::from_str::<Value>(raw)? else {
            return Err(DocumentError::NotAnObject);
        };
        Ok(AttachmentsDocument {
            instances: map.into_iter().collect(),
        })
    }

    /// Appends `records` to `instance`, creating it when missing. Returns the
    /// number of records appended; fails without touching the document when
    /// `instance` holds something other than a list.
    pub fn append<I>(&mut self, instance: &str, records: I) -> Result<usize, DocumentError>
    where
        I: IntoIterator<Item = Attachment>,
    {
        let slot = self
            .instances
            .entry(instance.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(list) = slot else {
            return Err(DocumentError::NotAList(instance.to_string()));
        };
        let before = list.len();
        list.extend(records.into_iter().map(Attachment::into_value));
        Ok(list.len() - before)
    }

    /// Total records across all list-valued instances.
    pub fn len(&self) -> usize {
        self.instances
            .values()
            .filter_map(Value::as_array)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compact JSON with unescaped unicode, matching what the plugin stores.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
