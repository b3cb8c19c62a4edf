//! redb table definitions for the coordination store.
//!
//! A single flat table holds every record. Keys are full paths under the
//! root namespace (`/keelson/tasks/<id>`), values are UTF-8 JSON documents.

use redb::TableDefinition;

/// All records, keyed by namespaced path.
pub const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");
