//! Decoders for the data written by Attachments 1.x and Attachments Pro.

use std::cmp::Ordering;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use thiserror::Error;

use crate::document::Attachment;
use crate::php::{self, PhpError, PhpValue};
use crate::text::{field_slug, stripslashes};

/// Multi-valued post meta holding one base64 blob per 1.x attachment.
pub const LEGACY_META_KEY: &str = "_attachments";
/// Single post meta holding the whole Pro payload.
pub const PRO_META_KEY: &str = "_attachments_pro";
pub const LEGACY_SETTINGS_OPTION: &str = "attachments_settings";
pub const PRO_SETTINGS_OPTION: &str = "_iti_apro_settings";

#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("legacy entry is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("legacy entry is not a serialized value: {0}")]
    Php(#[from] PhpError),
    #[error("expected a serialized array")]
    NotAnArray,
    #[error("field `{0}` is not a scalar")]
    NotAScalar(&'static str),
}

/// One Attachments 1.x entry after `stripslashes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRecord {
    pub id: String,
    pub title: String,
    pub caption: String,
    pub order: String,
}

impl LegacyRecord {
    /// Decodes one `_attachments` meta value: base64 over a serialized array.
    /// Missing keys read as empty strings.
    pub fn decode(raw: &str) -> Result<Self, LegacyError> {
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD.decode(compact.as_bytes())?;
        let value = php::unserialize(&bytes)?;
        if value.as_array().is_none() {
            return Err(LegacyError::NotAnArray);
        }

        let field = |name: &'static str| -> Result<String, LegacyError> {
            match value.get(name) {
                None => Ok(String::new()),
                Some(v) => v
                    .to_php_string()
                    .map(|s| stripslashes(&s))
                    .ok_or(LegacyError::NotAScalar(name)),
            }
        };

        Ok(LegacyRecord {
            id: field("id")?,
            title: field("title")?,
            caption: field("caption")?,
            order: field("order")?,
        })
    }

    /// Encodes a record the way 1.x stored it. Used to build fixtures.
    pub fn encode(&self) -> String {
        let value = PhpValue::assoc([
            ("id", PhpValue::from(self.id.as_str())),
            ("title", PhpValue::from(self.title.as_str())),
            ("caption", PhpValue::from(self.caption.as_str())),
            ("order", PhpValue::from(self.order.as_str())),
        ]);
        STANDARD.encode(php::serialize(&value))
    }
}

/// PHP `intval` on a string: optional sign and leading digits, otherwise 0.
/// Out-of-range values saturate.
fn intval(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, sign_len) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, 1),
        Some(b'+') => (false, 1),
        _ => (false, 0),
    };
    let digits = trimmed[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return 0;
    }
    match trimmed[..sign_len + digits].parse::<i64>() {
        Ok(value) => value,
        Err(_) if negative => i64::MIN,
        Err(_) => i64::MAX,
    }
}

/// Ordering used by 1.x when listing attachments: integer value of `order`.
pub fn legacy_order_cmp(a: &LegacyRecord, b: &LegacyRecord) -> Ordering {
    intval(&a.order).cmp(&intval(&b.order))
}

/// Stable sort by [`legacy_order_cmp`]; ties keep their stored order.
pub fn sort_legacy(records: &mut [LegacyRecord]) {
    records.sort_by(legacy_order_cmp);
}

/// `attachments_settings`: which post types 1.x was enabled for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacySettings {
    pub post_types: Vec<String>,
}

impl LegacySettings {
    /// Returns `None` when the option has no usable `post_types` array.
    pub fn decode(raw: &str) -> Result<Option<Self>, LegacyError> {
        let value = php::maybe_unserialize(raw)?;
        let Some(entries) = value.get("post_types").and_then(PhpValue::as_array) else {
            return Ok(None);
        };
        if entries.is_empty() {
            return Ok(None);
        }
        let post_types: Vec<String> = entries
            .iter()
            .filter(|(_, enabled)| enabled.is_truthy())
            .map(|(key, _)| key.as_string())
            .collect();
        Ok(Some(LegacySettings { post_types }))
    }
}

/// One configured Pro instance ("position"): its name and field label table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProInstanceConfig {
    pub name: String,
    pub label: String,
    /// Pro field key → operator-facing label, in configured order.
    pub fields: Vec<(String, String)>,
}

impl ProInstanceConfig {
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
    }

    /// Destination field name for a stored Pro field key, if the table maps it.
    pub fn destination_field(&self, key: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, label)| field_slug(label))
            .filter(|slug| !slug.is_empty())
    }

    fn from_php(value: &PhpValue) -> Option<Self> {
        value.as_array()?;
        let scalar = |name: &str| {
            value
                .get(name)
                .and_then(PhpValue::to_php_string)
                .unwrap_or_default()
        };
        let fields: Vec<(String, String)> = value
            .get("fields")
            .and_then(PhpValue::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, field)| {
                        let label = field
                            .get("label")
                            .and_then(PhpValue::to_php_string)
                            .unwrap_or_default();
                        (key.as_string(), label)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(ProInstanceConfig {
            name: scalar("name"),
            label: scalar("label"),
            fields,
        })
    }
}

/// `_iti_apro_settings`: the configured Pro instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProSettings {
    pub positions: Vec<ProInstanceConfig>,
}

impl ProSettings {
    /// Returns `None` when the option has no `positions` array.
    pub fn decode(raw: &str) -> Result<Option<Self>, LegacyError> {
        let value = php::maybe_unserialize(raw)?;
        let Some(entries) = value.get("positions").and_then(PhpValue::as_array) else {
            return Ok(None);
        };
        let positions = entries
            .iter()
            .filter_map(|(_, position)| ProInstanceConfig::from_php(position))
            .collect();
        Ok(Some(ProSettings { positions }))
    }
}

/// One stored Pro attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProRecord {
    pub id: Value,
    /// `None` when the record carried no `fields` array.
    pub fields: Option<Vec<(String, Value)>>,
}

impl ProRecord {
    /// Converts to the new schema using `config`'s label table. Unmapped
    /// fields are dropped; `fields` is always present.
    pub fn convert(&self, config: &ProInstanceConfig) -> Attachment {
        let mut converted = Attachment::new(self.id.clone());
        for (key, value) in self.fields.iter().flatten() {
            if let Some(destination) = config.destination_field(key) {
                converted = converted.with_field(destination, value.clone());
            }
        }
        converted
    }
}

/// The `_attachments_pro` payload: stored instance name → records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProPayload {
    pub instances: Vec<(String, Vec<ProRecord>)>,
}

impl ProPayload {
    /// Returns `None` when there is no non-empty `attachments` array.
    pub fn decode(raw: &str) -> Result<Option<Self>, LegacyError> {
        let value = php::maybe_unserialize(raw)?;
        let Some(stored) = value.get("attachments").and_then(PhpValue::as_array) else {
            return Ok(None);
        };
        if stored.is_empty() {
            return Ok(None);
        }

        let mut instances = Vec::with_capacity(stored.len());
        for (name, records) in stored {
            let records: Vec<ProRecord> = records
                .as_array()
                .map(|entries| entries.iter().map(|(_, r)| ProRecord::from_php(r)).collect())
                .unwrap_or_default();
            instances.push((name.as_string(), records));
        }
        Ok(Some(ProPayload { instances }))
    }
}

impl ProRecord {
    fn from_php(value: &PhpValue) -> Self {
        let id = value.get("id").map(PhpValue::to_json).unwrap_or(Value::Null);
        let fields = value.get("fields").and_then(PhpValue::as_array).map(|entries| {
            entries
                .iter()
                .map(|(key, field)| (key.as_string(), field.to_json()))
                .collect()
        });
        ProRecord { id, fields }
    }
}
