//! # Credential Document
//!
//! The structured document of saved passwords that both nodes exchange.
//!
//! ## Document Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CredentialDocument                                 │
//! │                                                                         │
//! │  {                                     top level: JSON object only     │
//! │      "04A1B2C3": {                     key: card UID / site / user     │
//! │          "pin": "1234",                value: any JSON, opaque to the  │
//! │          "mail": { ... }                      sync protocol            │
//! │      }                                                                  │
//! │  }                                                                      │
//! │                                                                         │
//! │  decode()   bytes ──► strict parse ──► object check ──► document       │
//! │  encode()   document ──► 4-space pretty print ──► trailing newline     │
//! │  validate() decode().is_ok()                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are kept sorted, so encoding is deterministic: saving the same text
//! twice produces byte-identical files.

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

/// Indentation used for every document written to disk or the bus.
const INDENT: &[u8] = b"    ";

/// A credential document: string keys mapped to structured entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialDocument {
    entries: Map<String, Value>,
}

/// Result of merging a pushed document into an existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Keys whose entries were replaced.
    pub updated: Vec<String>,

    /// Keys that do not exist locally and were left out.
    pub rejected: Vec<String>,
}

impl MergeOutcome {
    /// Returns true if at least one entry changed.
    pub fn changed(&self) -> bool {
        !self.updated.is_empty()
    }
}

impl CredentialDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Codec
    // =========================================================================

    /// Strictly parses a document.
    ///
    /// Any malformed JSON, trailing garbage, or a non-object top level is
    /// rejected with no partial result.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Object(entries) => Ok(CredentialDocument { entries }),
            other => Err(CoreError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    /// Serializes the document as pretty-printed JSON.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(128);
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT));
        self.entries
            .serialize(&mut ser)
            .map_err(|e| CoreError::Encode(e.to_string()))?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Returns true if `bytes` decodes to a document.
    pub fn validate(bytes: &[u8]) -> bool {
        Self::decode(bytes).is_ok()
    }

    // =========================================================================
    // Entry Access
    // =========================================================================

    /// Returns the entry stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Inserts or replaces an entry, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entry keys in encoding order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Builds a single-entry document `{key: entry}`.
    ///
    /// This is what the companion sends back after a successful card + PIN
    /// check.
    pub fn select(&self, key: &str) -> Option<CredentialDocument> {
        self.entries.get(key).map(|entry| {
            let mut entries = Map::new();
            entries.insert(key.to_string(), entry.clone());
            CredentialDocument { entries }
        })
    }

    /// Reads the `pin` field of an entry as a string.
    ///
    /// Numeric PINs are rendered in decimal so `1234` and `"1234"` compare
    /// equal against keypad input.
    pub fn entry_pin(&self, key: &str) -> Option<String> {
        match self.entries.get(key)?.get("pin")? {
            Value::String(pin) => Some(pin.clone()),
            Value::Number(pin) => Some(pin.to_string()),
            _ => None,
        }
    }

    /// Replaces local entries with the pushed ones, key by key.
    ///
    /// Only keys that already exist locally are updated; a push cannot
    /// create new entries on the companion.
    pub fn merge_existing(&mut self, incoming: &CredentialDocument) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (key, entry) in &incoming.entries {
            match self.entries.get_mut(key) {
                Some(slot) => {
                    *slot = entry.clone();
                    outcome.updated.push(key.clone());
                }
                None => outcome.rejected.push(key.clone()),
            }
        }
        outcome
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CredentialDocument {
        let mut doc = CredentialDocument::new();
        doc.insert(
            "04A1B2C3",
            json!({ "pin": "1234", "mail": { "user": "ayse", "pass": "çok-gizli" } }),
        );
        doc.insert("example.com", json!({ "user": "a", "pass": "x" }));
        doc
    }

    #[test]
    fn test_round_trip() {
        let doc = sample();
        let bytes = doc.encode().unwrap();
        assert_eq!(CredentialDocument::decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_encode_is_pretty_and_deterministic() {
        let doc = CredentialDocument::decode(br#"{"user":"a","site":"example.com","pass":"x"}"#)
            .unwrap();
        let text = String::from_utf8(doc.encode().unwrap()).unwrap();
        assert_eq!(
            text,
            "{\n    \"pass\": \"x\",\n    \"site\": \"example.com\",\n    \"user\": \"a\"\n}\n"
        );
        assert_eq!(doc.encode().unwrap(), doc.encode().unwrap());
    }

    #[test]
    fn test_numbers_are_written_as_given() {
        let doc =
            CredentialDocument::decode(br#"{"n":{"big":123456789012345678901234,"f":1.50}}"#)
                .unwrap();
        let text = String::from_utf8(doc.encode().unwrap()).unwrap();
        assert!(text.contains("\"big\": 123456789012345678901234"));
        assert!(text.contains("\"f\": 1.50"));
    }

    #[test]
    fn test_non_ascii_is_kept_verbatim() {
        let text = String::from_utf8(sample().encode().unwrap()).unwrap();
        assert!(text.contains("çok-gizli"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            CredentialDocument::decode(b"not json"),
            Err(CoreError::Decode(_))
        ));
        assert!(CredentialDocument::decode(b"").is_err());
        assert!(CredentialDocument::decode(br#"{"a":1} trailing"#).is_err());
        assert!(CredentialDocument::decode(br#"{"a":"#).is_err());
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            CredentialDocument::decode(b"[1,2]"),
            Err(CoreError::NotAnObject { found: "array" })
        ));
        assert!(matches!(
            CredentialDocument::decode(b"\"text\""),
            Err(CoreError::NotAnObject { found: "string" })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(CredentialDocument::validate(b"{}"));
        assert!(CredentialDocument::validate(br#"{"site":"example.com"}"#));
        assert!(!CredentialDocument::validate(b"not json"));
        assert!(!CredentialDocument::validate(b"42"));
    }

    #[test]
    fn test_select_single_entry() {
        let doc = sample();
        let selected = doc.select("04A1B2C3").unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.get("04A1B2C3"), doc.get("04A1B2C3"));
        assert!(doc.select("FFFFFFFF").is_none());
    }

    #[test]
    fn test_entry_pin_string_and_number() {
        let mut doc = sample();
        assert_eq!(doc.entry_pin("04A1B2C3").as_deref(), Some("1234"));

        doc.insert("0BADCAFE", json!({ "pin": 4321 }));
        assert_eq!(doc.entry_pin("0BADCAFE").as_deref(), Some("4321"));

        assert_eq!(doc.entry_pin("example.com"), None);
        assert_eq!(doc.entry_pin("missing"), None);
    }

    #[test]
    fn test_merge_only_updates_existing_keys() {
        let mut local = sample();
        let mut incoming = CredentialDocument::new();
        incoming.insert("04A1B2C3", json!({ "pin": "9999" }));
        incoming.insert("stranger", json!({ "pin": "0000" }));

        let outcome = local.merge_existing(&incoming);

        assert_eq!(outcome.updated, vec!["04A1B2C3".to_string()]);
        assert_eq!(outcome.rejected, vec!["stranger".to_string()]);
        assert!(outcome.changed());
        assert_eq!(local.entry_pin("04A1B2C3").as_deref(), Some("9999"));
        assert!(!local.contains_key("stranger"));
        assert_eq!(local.len(), 2);
    }
}
