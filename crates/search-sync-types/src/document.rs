//! Denormalized documents.
//!
//! Rows come back from the database already shaped as JSON objects, and the
//! transform hooks mutate them in place before they are written. A document
//! is always written whole; there is no partial update.

use serde_json::{Map, Value};

/// A JSON document keyed by column / field name.
pub type Document = Map<String, Value>;

/// Read an integer field, accepting integral floats.
///
/// Row JSON widens wide numeric columns to floating point, so `42.0` is a
/// valid id.
pub fn doc_i64(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a non-empty string field.
pub fn doc_str<'a>(doc: &'a Document, key: &str) -> Option<&'a str> {
    doc.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
