//! Document finalize helpers shared by entity kinds.
//!
//! All helpers are pure functions of the document they are given, so
//! re-indexing unchanged rows produces identical documents.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use search_sync_types::{doc_i64, doc_str, Document};

/// Join the non-empty string parts with spaces.
pub fn suggest<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a comma separated tag string into trimmed, de-duplicated tags.
///
/// First occurrence wins, order is preserved.
pub fn split_tags(tags: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// Replace a string `tags` field with its list form. Missing tags become `[]`.
pub fn normalize_tags(doc: &mut Document) {
    let tags = match doc.get("tags") {
        Some(Value::String(s)) => split_tags(s),
        Some(Value::Array(items)) => {
            let joined: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            split_tags(&joined.join(","))
        }
        _ => Vec::new(),
    };
    doc.insert(
        "tags".to_string(),
        Value::Array(tags.into_iter().map(Value::String).collect()),
    );
}

/// Length of an embedded array field, zero when absent.
pub fn array_len(doc: &Document, key: &str) -> usize {
    doc.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

/// Set `count_key` to the length of the `array_key` array.
pub fn count_from_array(doc: &mut Document, array_key: &str, count_key: &str) {
    let count = array_len(doc, array_key);
    doc.insert(count_key.to_string(), Value::from(count));
}

/// The most recent route slug: the last non-empty entry of `routes`.
pub fn latest_route(doc: &Document) -> Option<&str> {
    doc.get("routes")?
        .as_array()?
        .iter()
        .rev()
        .filter_map(Value::as_str)
        .find(|slug| !slug.is_empty())
}

/// `/<handle>/<slug>` from the owner handle and the latest route.
pub fn permalink(doc: &Document) -> Option<String> {
    let handle = doc.get("user").and_then(Value::as_object).and_then(|u| doc_str(u, "handle"))?;
    let slug = latest_route(doc)?;
    Some(format!("/{handle}/{slug}"))
}

/// Prefer `release_date` over `created_at` when it is set.
pub fn prefer_release_date(doc: &mut Document) {
    if let Some(release) = doc_str(doc, "release_date").map(str::to_string) {
        doc.insert("created_at".to_string(), Value::String(release));
    }
}

/// Owner display fields from the embedded `user` object.
pub fn owner_fields(doc: &Document) -> (Option<String>, Option<String>) {
    let user = doc.get("user").and_then(Value::as_object);
    let handle = user.and_then(|u| doc_str(u, "handle")).map(str::to_string);
    let name = user.and_then(|u| doc_str(u, "name")).map(str::to_string);
    (handle, name)
}

/// Comma separated id list for an `in (...)` predicate.
///
/// Ids are integers, so interpolation is safe.
pub fn id_list(ids: impl IntoIterator<Item = i64>) -> String {
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Group rows by an integer key column.
pub fn group_by(rows: Vec<Document>, key: &str) -> BTreeMap<i64, Vec<Value>> {
    let mut groups: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
    for row in rows {
        if let Some(id) = doc_i64(&row, key) {
            groups.entry(id).or_default().push(Value::Object(row));
        }
    }
    groups
}
