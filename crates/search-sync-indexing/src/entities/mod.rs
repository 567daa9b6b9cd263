//! Entity kinds and their index definitions.

mod playlists;
mod plays;
mod social;
mod tracks;
mod users;

pub use playlists::PlaylistsSpec;
pub use plays::PlaysSpec;
pub use social::{SocialKind, SocialSpec};
pub use tracks::TracksSpec;
pub use users::UsersSpec;

use serde_json::{json, Value};

/// Index creation body shared by every kind.
///
/// Unmapped fields are kept in `_source` but not indexed.
pub(crate) fn index_body(properties: Value) -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
            "refresh_interval": "5s",
            "analysis": {
                "normalizer": {
                    "lower_asciifolding": {
                        "type": "custom",
                        "filter": ["lowercase", "asciifolding"]
                    }
                }
            }
        },
        "mappings": {
            "dynamic": false,
            "properties": properties
        }
    })
}

/// Embedded owner summary.
pub(crate) fn owner_properties() -> Value {
    json!({
        "properties": {
            "handle": { "type": "keyword", "normalizer": "lower_asciifolding" },
            "name": { "type": "text" },
            "location": { "type": "keyword" },
            "is_verified": { "type": "boolean" }
        }
    })
}

/// `json_build_object` expression for the owner summary of `users`.
pub(crate) const OWNER_OBJECT_SQL: &str = "json_build_object(\
    'handle', users.handle, \
    'name', users.name, \
    'location', users.location, \
    'is_verified', users.is_verified)";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_spec::EntityIndexSpec;
    use search_sync_types::WatchedTable;

    fn specs() -> Vec<Box<dyn EntityIndexSpec>> {
        vec![
            Box::new(UsersSpec),
            Box::new(TracksSpec),
            Box::new(PlaylistsSpec),
            Box::new(SocialSpec::new(SocialKind::Reposts)),
            Box::new(SocialSpec::new(SocialKind::Saves)),
            Box::new(PlaysSpec),
        ]
    }

    #[test]
    fn test_every_indexed_table_has_a_kind() {
        let tables: Vec<WatchedTable> = specs().iter().map(|s| s.table()).collect();
        assert_eq!(tables, WatchedTable::INDEXED.to_vec());
    }

    #[test]
    fn test_mappings_carry_version_field() {
        for spec in specs() {
            let mapping = spec.mapping();
            let field = spec.table().version_field().as_str();
            assert!(
                mapping["mappings"]["properties"].get(field).is_some(),
                "{} mapping lacks {field}",
                spec.alias()
            );
        }
    }

    #[test]
    fn test_index_names_are_generations_of_alias() {
        for spec in specs() {
            assert!(search_sync_conn::is_generation_of(
                &spec.index_name(),
                spec.alias()
            ));
        }
    }
}
