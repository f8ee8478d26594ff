//! Durable storage schema and versioned migration.

use rusqlite::Connection;

/// Current schema version, written to SQLite's `user_version` pragma.
pub const SCHEMA_VERSION: i64 = 1;

/// Schema for the entity and pending-write tables.
///
/// `seq` is a store-wide monotone insertion counter: `get_all` orders by it
/// and eviction deletes the lowest values, so replacing a row (upsert of an
/// existing id) renews that record's position.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    collection TEXT NOT NULL,
    id INTEGER NOT NULL,
    parent_id INTEGER,
    data BLOB NOT NULL,
    seq INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(collection, parent_id);
CREATE INDEX IF NOT EXISTS idx_entities_seq ON entities(collection, seq);

-- Reviews accepted while offline, waiting for server confirmation.
CREATE TABLE IF NOT EXISTS pending_reviews (
    correlation_id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    seq INTEGER NOT NULL
);
"#;

/// Run the one-time migration for a freshly opened database.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

  if version < SCHEMA_VERSION {
    conn.execute_batch(SCHEMA_V1)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  }

  Ok(())
}
