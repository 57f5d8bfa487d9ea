//! Reader and writer for PHP's native `serialize()` format.
//!
//! Legacy Attachments data is stored this way: v1 entries are base64 over a
//! serialized array, while the Pro payload and both settings options are
//! serialized arrays written directly into the meta/options tables.
//! Strings are length-prefixed in bytes, so the parser works on `&[u8]` and
//! only converts to UTF-8 once a string body has been sliced out.

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Nesting limit for arrays; legacy payloads are at most three levels deep.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// PHP arrays are ordered maps; insertion order is significant.
    Array(Vec<(PhpKey, PhpValue)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhpKey {
    Int(i64),
    Str(String),
}

impl PhpKey {
    /// Matches the way PHP looks up `$array['5']` and `$array[5]` as the same slot.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            PhpKey::Str(s) => s == key,
            PhpKey::Int(i) => key.parse::<i64>().map(|k| k == *i).unwrap_or(false),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            PhpKey::Str(s) => s.clone(),
            PhpKey::Int(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhpError {
    #[error("unexpected end of input at byte {0}")]
    Eof(usize),
    #[error("unexpected {found:?} at byte {offset}, expected {expected}")]
    Unexpected {
        offset: usize,
        found: char,
        expected: &'static str,
    },
    #[error("invalid number at byte {0}")]
    Number(usize),
    #[error("unsupported type tag {tag:?} at byte {offset}")]
    Unsupported { offset: usize, tag: char },
    #[error("arrays nested too deeply at byte {0}")]
    TooDeep(usize),
    #[error("trailing data at byte {0}")]
    Trailing(usize),
}

impl PhpError {
    pub fn offset(&self) -> usize {
        match self {
            PhpError::Eof(offset)
            | PhpError::Number(offset)
            | PhpError::TooDeep(offset)
            | PhpError::Trailing(offset) => *offset,
            PhpError::Unexpected { offset, .. } | PhpError::Unsupported { offset, .. } => *offset,
        }
    }
}

impl PhpValue {
    /// Builds an associative array from string keys, preserving order.
    pub fn assoc<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, PhpValue)>,
    {
        PhpValue::Array(
            entries
                .into_iter()
                .map(|(k, v)| (PhpKey::Str(k.into()), v))
                .collect(),
        )
    }

    /// Builds a list (`0..n` integer keys).
    pub fn list<I>(values: I) -> Self
    where
        I: IntoIterator<Item = PhpValue>,
    {
        PhpValue::Array(
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (PhpKey::Int(i as i64), v))
                .collect(),
        )
    }

    pub fn as_array(&self) -> Option<&[(PhpKey, PhpValue)]> {
        match self {
            PhpValue::Array(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhpValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Looks up `key` the way PHP's `$value[$key]` would. Non-arrays yield `None`.
    pub fn get(&self, key: &str) -> Option<&PhpValue> {
        self.as_array()?
            .iter()
            .find(|(k, _)| k.matches(key))
            .map(|(_, v)| v)
    }

    /// PHP's string conversion for scalars. Arrays have no string form.
    pub fn to_php_string(&self) -> Option<String> {
        match self {
            PhpValue::Null => Some(String::new()),
            PhpValue::Bool(true) => Some("1".to_string()),
            PhpValue::Bool(false) => Some(String::new()),
            PhpValue::Int(i) => Some(i.to_string()),
            PhpValue::Float(f) => Some(format_float(*f)),
            PhpValue::Str(s) => Some(s.clone()),
            PhpValue::Array(_) => None,
        }
    }

    /// PHP truthiness: `""`, `"0"`, `0`, `0.0`, `null`, `false` and `[]` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            PhpValue::Null => false,
            PhpValue::Bool(b) => *b,
            PhpValue::Int(i) => *i != 0,
            PhpValue::Float(f) => *f != 0.0,
            PhpValue::Str(s) => !(s.is_empty() || s == "0"),
            PhpValue::Array(entries) => !entries.is_empty(),
        }
    }

    /// Converts to JSON the way `json_encode` does: arrays with keys `0..n`
    /// in order become JSON arrays, everything else becomes an object.
    pub fn to_json(&self) -> Value {
        match self {
            PhpValue::Null => Value::Null,
            PhpValue::Bool(b) => Value::Bool(*b),
            PhpValue::Int(i) => Value::Number((*i).into()),
            PhpValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            PhpValue::Str(s) => Value::String(s.clone()),
            PhpValue::Array(entries) => {
                let is_list = entries
                    .iter()
                    .enumerate()
                    .all(|(i, (k, _))| matches!(k, PhpKey::Int(n) if *n == i as i64));
                if is_list {
                    Value::Array(entries.iter().map(|(_, v)| v.to_json()).collect())
                } else {
                    let mut map = Map::with_capacity(entries.len());
                    for (k, v) in entries {
                        map.insert(k.as_string(), v.to_json());
                    }
                    Value::Object(map)
                }
            }
        }
    }
}

impl From<&str> for PhpValue {
    fn from(value: &str) -> Self {
        PhpValue::Str(value.to_string())
    }
}

impl From<String> for PhpValue {
    fn from(value: String) -> Self {
        PhpValue::Str(value)
    }
}

impl From<i64> for PhpValue {
    fn from(value: i64) -> Self {
        PhpValue::Int(value)
    }
}

impl From<bool> for PhpValue {
    fn from(value: bool) -> Self {
        PhpValue::Bool(value)
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NAN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        format!("{f}")
    }
}

/// Parses a complete serialized value. Trailing bytes other than whitespace
/// are rejected.
pub fn unserialize(input: &[u8]) -> Result<PhpValue, PhpError> {
    let mut parser = Parser { input, pos: 0 };
    let value = parser.value(0)?;
    if input[parser.pos..].iter().any(|b| !b.is_ascii_whitespace()) {
        return Err(PhpError::Trailing(parser.pos));
    }
    Ok(value)
}

/// Host-style `maybe_unserialize`: values that look serialized are decoded,
/// anything else is returned as a plain string.
pub fn maybe_unserialize(raw: &str) -> Result<PhpValue, PhpError> {
    if looks_serialized(raw) {
        unserialize(raw.trim().as_bytes())
    } else {
        Ok(PhpValue::Str(raw.to_string()))
    }
}

pub fn looks_serialized(raw: &str) -> bool {
    let data = raw.trim();
    if data == "N;" {
        return true;
    }
    let bytes = data.as_bytes();
    if bytes.len() < 4 || bytes[1] != b':' {
        return false;
    }
    if !matches!(bytes[bytes.len() - 1], b';' | b'}') {
        return false;
    }
    matches!(bytes[0], b'a' | b'O' | b'C' | b's' | b'b' | b'i' | b'd')
}

pub fn serialize(value: &PhpValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &PhpValue) {
    match value {
        PhpValue::Null => out.push_str("N;"),
        PhpValue::Bool(b) => {
            let _ = write!(out, "b:{};", u8::from(*b));
        }
        PhpValue::Int(i) => {
            let _ = write!(out, "i:{i};");
        }
        PhpValue::Float(f) => {
            let _ = write!(out, "d:{};", format_float(*f));
        }
        PhpValue::Str(s) => write_str(out, s),
        PhpValue::Array(entries) => {
            let _ = write!(out, "a:{}:{{", entries.len());
            for (key, entry) in entries {
                match key {
                    PhpKey::Int(i) => {
                        let _ = write!(out, "i:{i};");
                    }
                    PhpKey::Str(s) => write_str(out, s),
                }
                write_value(out, entry);
            }
            out.push('}');
        }
    }
}

fn write_str(out: &mut String, s: &str) {
    let _ = write!(out, "s:{}:\"{}\";", s.len(), s);
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8, PhpError> {
        self.input.get(self.pos).copied().ok_or(PhpError::Eof(self.pos))
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> Result<(), PhpError> {
        let found = self.peek()?;
        if found != byte {
            return Err(PhpError::Unexpected {
                offset: self.pos,
                found: found as char,
                expected,
            });
        }
        self.pos += 1;
        Ok(())
    }

    /// Reads up to (not including) `terminator` and advances past it.
    fn until(&mut self, terminator: u8) -> Result<&'a [u8], PhpError> {
        let start = self.pos;
        let rel = self.input[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or(PhpError::Eof(self.input.len()))?;
        self.pos = start + rel + 1;
        Ok(&self.input[start..start + rel])
    }

    fn int(&mut self, terminator: u8) -> Result<i64, PhpError> {
        let start = self.pos;
        let raw = self.until(terminator)?;
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(PhpError::Number(start))
    }

    fn length(&mut self) -> Result<usize, PhpError> {
        let start = self.pos;
        let n = self.int(b':')?;
        usize::try_from(n).map_err(|_| PhpError::Number(start))
    }

    fn string_body(&mut self) -> Result<String, PhpError> {
        let len = self.length()?;
        self.expect(b'"', "opening quote")?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(PhpError::Eof(self.input.len()))?;
        let body = String::from_utf8_lossy(&self.input[self.pos..end]).into_owned();
        self.pos = end;
        self.expect(b'"', "closing quote")?;
        Ok(body)
    }

    fn value(&mut self, depth: usize) -> Result<PhpValue, PhpError> {
        let tag_offset = self.pos;
        let tag = self.peek()?;
        self.pos += 1;
        if tag == b'N' {
            self.expect(b';', "';'")?;
            return Ok(PhpValue::Null);
        }
        if !matches!(tag, b'b' | b'i' | b'd' | b's' | b'a') {
            return Err(PhpError::Unsupported {
                offset: tag_offset,
                tag: tag as char,
            });
        }
        self.expect(b':', "':'")?;
        match tag {
            b'b' => match self.int(b';')? {
                0 => Ok(PhpValue::Bool(false)),
                1 => Ok(PhpValue::Bool(true)),
                _ => Err(PhpError::Number(tag_offset + 2)),
            },
            b'i' => Ok(PhpValue::Int(self.int(b';')?)),
            b'd' => {
                let start = self.pos;
                let raw = self.until(b';')?;
                let parsed = match raw {
                    b"INF" => Some(f64::INFINITY),
                    b"-INF" => Some(f64::NEG_INFINITY),
                    b"NAN" => Some(f64::NAN),
                    other => std::str::from_utf8(other)
                        .ok()
                        .and_then(|s| s.parse::<f64>().ok()),
                };
                parsed.map(PhpValue::Float).ok_or(PhpError::Number(start))
            }
            b's' => {
                let body = self.string_body()?;
                self.expect(b';', "';'")?;
                Ok(PhpValue::Str(body))
            }
            _ => {
                if depth >= MAX_DEPTH {
                    return Err(PhpError::TooDeep(tag_offset));
                }
                let count = self.length()?;
                self.expect(b'{', "'{'")?;
                // Cap the preallocation; the count is untrusted input.
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = self.key()?;
                    let entry = self.value(depth + 1)?;
                    entries.push((key, entry));
                }
                self.expect(b'}', "'}'")?;
                Ok(PhpValue::Array(entries))
            }
        }
    }

    fn key(&mut self) -> Result<PhpKey, PhpError> {
        let offset = self.pos;
        let tag = self.peek()?;
        if !matches!(tag, b'i' | b's') {
            return Err(PhpError::Unexpected {
                offset,
                found: tag as char,
                expected: "array key",
            });
        }
        self.pos += 1;
        self.expect(b':', "':'")?;
        if tag == b'i' {
            return Ok(PhpKey::Int(self.int(b';')?));
        }
        let body = self.string_body()?;
        self.expect(b';', "';'")?;
        Ok(PhpKey::Str(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_legacy_v1_entry() {
        let raw = br#"a:4:{s:2:"id";s:1:"5";s:5:"title";s:2:"Hi";s:7:"caption";s:3:"Cap";s:5:"order";s:1:"2";}"#;
        let value = unserialize(raw).unwrap();
        assert_eq!(value.get("id").and_then(PhpValue::as_str), Some("5"));
        assert_eq!(value.get("caption").and_then(PhpValue::as_str), Some("Cap"));
        assert_eq!(value.get("order").and_then(PhpValue::as_str), Some("2"));
    }

    #[test]
    fn string_lengths_are_bytes() {
        let raw = "s:5:\"café\";".as_bytes();
        assert_eq!(unserialize(raw).unwrap(), PhpValue::from("café"));
    }

    #[test]
    fn strings_may_contain_quotes_and_semicolons() {
        let raw = br#"s:6:"a";"b;";"#;
        assert_eq!(unserialize(raw).unwrap(), PhpValue::from("a\";\"b;"));
    }

    #[test]
    fn integer_and_string_keys_look_up_alike() {
        let value = unserialize(br#"a:2:{i:7;s:1:"x";s:3:"key";b:1;}"#).unwrap();
        assert_eq!(value.get("7"), Some(&PhpValue::from("x")));
        assert_eq!(value.get("key"), Some(&PhpValue::Bool(true)));
        assert_eq!(value.get("missing"), None);
    }

    #[test]
    fn rejects_objects_and_references() {
        let err = unserialize(br#"O:8:"stdClass":0:{}"#).unwrap_err();
        assert!(matches!(err, PhpError::Unsupported { tag: 'O', offset: 0 }));
        let err = unserialize(b"a:1:{i:0;R:1;}").unwrap_err();
        assert!(matches!(err, PhpError::Unsupported { tag: 'R', .. }));
    }

    #[test]
    fn rejects_truncated_and_trailing_input() {
        assert!(matches!(unserialize(b"s:10:\"short\";"), Err(PhpError::Eof(_))));
        assert!(matches!(unserialize(b"a:2:{i:0;i:1;}"), Err(PhpError::Unexpected { .. })));
        assert!(matches!(unserialize(b"i:1;junk"), Err(PhpError::Trailing(4))));
        assert!(unserialize(b"i:1;\n").is_ok());
    }

    #[test]
    fn rejects_absurd_nesting() {
        let mut raw = String::new();
        for _ in 0..=MAX_DEPTH {
            raw.push_str("a:1:{i:0;");
        }
        raw.push_str("N;");
        for _ in 0..=MAX_DEPTH {
            raw.push('}');
        }
        assert!(matches!(unserialize(raw.as_bytes()), Err(PhpError::TooDeep(_))));
    }

    #[test]
    fn maybe_unserialize_passes_plain_strings_through() {
        assert_eq!(maybe_unserialize("hello").unwrap(), PhpValue::from("hello"));
        assert_eq!(maybe_unserialize("1").unwrap(), PhpValue::from("1"));
        assert_eq!(maybe_unserialize(" b:1; ").unwrap(), PhpValue::Bool(true));
        assert!(maybe_unserialize("a:1:{broken}").is_err());
    }

    #[test]
    fn truthiness_follows_php() {
        assert!(!PhpValue::from("0").is_truthy());
        assert!(!PhpValue::from("").is_truthy());
        assert!(PhpValue::from("false").is_truthy());
        assert!(!PhpValue::Int(0).is_truthy());
        assert!(!PhpValue::Array(Vec::new()).is_truthy());
        assert!(PhpValue::list([PhpValue::Null]).is_truthy());
    }

    #[test]
    fn json_conversion_distinguishes_lists_from_maps() {
        let list = PhpValue::list([PhpValue::from("a"), PhpValue::Int(2)]);
        assert_eq!(list.to_json(), serde_json::json!(["a", 2]));

        let sparse = PhpValue::Array(vec![(PhpKey::Int(1), PhpValue::from("b"))]);
        assert_eq!(sparse.to_json(), serde_json::json!({"1": "b"}));
    }

    #[test]
    fn serializes_like_php() {
        let value = PhpValue::assoc([
            ("post_types", PhpValue::assoc([("post", PhpValue::Bool(true))])),
            ("ratio", PhpValue::Float(0.5)),
        ]);
        assert_eq!(
            serialize(&value),
            r#"a:2:{s:10:"post_types";a:1:{s:4:"post";b:1;}s:5:"ratio";d:0.5;}"#
        );
    }

    fn php_value() -> impl Strategy<Value = PhpValue> {
        let leaf = prop_oneof![
            Just(PhpValue::Null),
            any::<bool>().prop_map(PhpValue::Bool),
            any::<i64>().prop_map(PhpValue::Int),
            ".{0,12}".prop_map(PhpValue::Str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop::collection::vec(("[a-z_]{1,6}", inner), 0..4)
                .prop_map(|entries| PhpValue::assoc(entries))
        })
    }

    proptest! {
        #[test]
        fn serialized_output_parses_back(value in php_value()) {
            let encoded = serialize(&value);
            prop_assert!(looks_serialized(&encoded));
            prop_assert_eq!(unserialize(encoded.as_bytes()).unwrap(), value);
        }
    }
}
