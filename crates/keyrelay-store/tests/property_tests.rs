//! Property-based tests for the persisted store
//!
//! Writing the same document twice must leave byte-identical files, and
//! whatever is written must read back unchanged.

use keyrelay_core::CredentialDocument;
use keyrelay_store::CredentialStore;
use proptest::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

fn entry_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(Value::from),
        prop::string::string_regex("[1-9][0-9]{20,26}")
            .expect("valid regex")
            .prop_map(|digits| serde_json::from_str(&digits).expect("integer literal")),
        any::<String>().prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{0,8}", inner, 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect())),
        ]
    })
}

/// Compact JSON text as a user would hand it to save.
fn document_text_strategy() -> impl Strategy<Value = String> {
    prop::collection::btree_map(any::<String>(), entry_strategy(), 0..6).prop_map(|entries| {
        let object: serde_json::Map<String, Value> = entries.into_iter().collect();
        serde_json::to_string(&object).expect("serializable")
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Saving the same text twice leaves identical bytes on disk
    #[test]
    fn saving_twice_is_idempotent(text in document_text_strategy()) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("passwords.json"));

        let doc = CredentialDocument::decode(text.as_bytes()).unwrap();
        store.write_document(&doc).unwrap();
        let once = store.read().unwrap();

        let again = CredentialDocument::decode(text.as_bytes()).unwrap();
        store.write_document(&again).unwrap();
        let twice = store.read().unwrap();

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(store.read_document().unwrap(), doc);
    }
}
