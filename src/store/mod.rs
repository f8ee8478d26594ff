//! Capacity-bounded durable cache of entities, plus the durable side of the
//! pending-write queue.
//!
//! If the underlying database cannot be opened or a statement fails, every
//! operation degrades to a no-op returning empty/void instead of failing, so
//! the rest of the system can keep running network-only.

pub mod schema;

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::types::{PendingReview, Restaurant, Review};

/// Trait for records the store can hold.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Primary key within the collection.
  fn id(&self) -> i64;

  /// Secondary index value, for collections that have one.
  fn parent_id(&self) -> Option<i64> {
    None
  }

  /// Collection name for storage organization (e.g. "restaurants").
  fn collection() -> &'static str;
}

impl Entity for Restaurant {
  fn id(&self) -> i64 {
    self.id
  }

  fn collection() -> &'static str {
    "restaurants"
  }
}

impl Entity for Review {
  fn id(&self) -> i64 {
    self.id
  }

  fn parent_id(&self) -> Option<i64> {
    Some(self.restaurant_id)
  }

  fn collection() -> &'static str {
    "reviews"
  }
}

/// SQLite-backed local store. `conn` is `None` when the database could not
/// be opened; in that state every operation is a no-op.
pub struct PersistentStore {
  conn: Option<Mutex<Connection>>,
}

impl PersistentStore {
  /// Open or create the database at the given path.
  ///
  /// Never fails: an unavailable database yields a disabled store that
  /// answers every read with nothing and swallows every write.
  pub fn open(path: &Path) -> Self {
    match Self::try_open(path) {
      Ok(store) => store,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "storage unavailable, running network-only");
        Self::disabled()
      }
    }
  }

  fn try_open(path: &Path) -> rusqlite::Result<Self> {
    if let Some(parent) = path.parent() {
      if let Err(e) = std::fs::create_dir_all(parent) {
        warn!(error = %e, "failed to create data directory");
      }
    }

    let conn = Connection::open(path)?;
    schema::migrate(&conn)?;

    Ok(Self {
      conn: Some(Mutex::new(conn)),
    })
  }

  /// In-memory store, used in tests and anywhere durability is not needed.
  pub fn in_memory() -> Self {
    match Connection::open_in_memory().and_then(|conn| {
      schema::migrate(&conn)?;
      Ok(conn)
    }) {
      Ok(conn) => Self {
        conn: Some(Mutex::new(conn)),
      },
      Err(e) => {
        warn!(error = %e, "failed to open in-memory store");
        Self::disabled()
      }
    }
  }

  /// A store with no backing database. Every operation is a no-op.
  pub fn disabled() -> Self {
    Self { conn: None }
  }

  pub fn is_available(&self) -> bool {
    self.conn.is_some()
  }

  /// Run `f` against the connection, logging and swallowing failures.
  fn with_conn<R>(&self, op: &'static str, f: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> Option<R> {
    let mutex = self.conn.as_ref()?;
    let conn = match mutex.lock() {
      Ok(guard) => guard,
      // A poisoned lock still guards a usable connection.
      Err(poisoned) => poisoned.into_inner(),
    };

    match f(&conn) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(op, error = %e, "storage operation failed, continuing without cache");
        None
      }
    }
  }

  /// Insert-or-replace by id. Replacing an existing id assigns a fresh
  /// insertion position.
  pub fn upsert<T: Entity>(&self, record: &T) {
    self.with_conn("upsert", |conn| insert_entity(conn, record));
  }

  /// Upsert a batch in one transaction, preserving slice order.
  pub fn upsert_all<T: Entity>(&self, records: &[T]) {
    if records.is_empty() {
      return;
    }

    self.with_conn("upsert_all", |conn| {
      conn.execute("BEGIN TRANSACTION", [])?;
      for record in records {
        if let Err(e) = insert_entity(conn, record) {
          conn.execute("ROLLBACK", [])?;
          return Err(e);
        }
      }
      conn.execute("COMMIT", [])?;
      Ok(())
    });
  }

  /// Look up a single record. Never touches the network.
  pub fn get_by_id<T: Entity>(&self, id: i64) -> Option<T> {
    self
      .with_conn("get_by_id", |conn| {
        let mut stmt =
          conn.prepare("SELECT data FROM entities WHERE collection = ? AND id = ?")?;
        let data: Option<Vec<u8>> = stmt
          .query_row(params![T::collection(), id], |row| row.get(0))
          .map(Some)
          .or_else(ignore_no_rows)?;
        Ok(data)
      })
      .flatten()
      .and_then(|data| deserialize_entity::<T>(&data))
  }

  /// The full collection in insertion order, possibly empty.
  pub fn get_all<T: Entity>(&self) -> Vec<T> {
    self
      .with_conn("get_all", |conn| {
        let mut stmt = conn
          .prepare("SELECT data FROM entities WHERE collection = ? ORDER BY seq ASC")?;
        let rows: Vec<Vec<u8>> = stmt
          .query_map(params![T::collection()], |row| row.get(0))?
          .filter_map(|r| r.ok())
          .collect();
        Ok(rows)
      })
      .map(|rows| rows.iter().filter_map(|data| deserialize_entity(data)).collect())
      .unwrap_or_default()
  }

  /// Records matching the secondary index, in insertion order.
  pub fn get_by_parent<T: Entity>(&self, parent_id: i64) -> Vec<T> {
    self
      .with_conn("get_by_parent", |conn| {
        let mut stmt = conn.prepare(
          "SELECT data FROM entities WHERE collection = ? AND parent_id = ? ORDER BY seq ASC",
        )?;
        let rows: Vec<Vec<u8>> = stmt
          .query_map(params![T::collection(), parent_id], |row| row.get(0))?
          .filter_map(|r| r.ok())
          .collect();
        Ok(rows)
      })
      .map(|rows| rows.iter().filter_map(|data| deserialize_entity(data)).collect())
      .unwrap_or_default()
  }

  /// Delete the oldest entries beyond `cap`, by insertion order.
  pub fn evict_excess<T: Entity>(&self, cap: usize) {
    self.with_conn("evict_excess", |conn| {
      let deleted = conn.execute(
        "DELETE FROM entities
         WHERE collection = ?1
           AND seq NOT IN (
             SELECT seq FROM entities WHERE collection = ?1
             ORDER BY seq DESC LIMIT ?2
           )",
        params![T::collection(), cap as i64],
      )?;
      if deleted > 0 {
        debug!(collection = T::collection(), deleted, "evicted oldest cached entries");
      }
      Ok(())
    });
  }

  /// Durably persist a queued review.
  pub fn put_pending(&self, pending: &PendingReview) {
    self.with_conn("put_pending", |conn| {
      let data = serde_json::to_vec(pending)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
      conn.execute(
        "INSERT OR REPLACE INTO pending_reviews (correlation_id, data, seq)
         VALUES (?, ?, (SELECT IFNULL(MAX(seq), 0) + 1 FROM pending_reviews))",
        params![pending.correlation_id, data],
      )?;
      Ok(())
    });
  }

  /// Remove a queued review once the server has confirmed it.
  pub fn remove_pending(&self, correlation_id: &str) {
    self.with_conn("remove_pending", |conn| {
      conn.execute(
        "DELETE FROM pending_reviews WHERE correlation_id = ?",
        params![correlation_id],
      )?;
      Ok(())
    });
  }

  /// All queued reviews in enqueue order.
  pub fn list_pending(&self) -> Vec<PendingReview> {
    self
      .with_conn("list_pending", |conn| {
        let mut stmt = conn.prepare("SELECT data FROM pending_reviews ORDER BY seq ASC")?;
        let rows: Vec<Vec<u8>> = stmt
          .query_map([], |row| row.get(0))?
          .filter_map(|r| r.ok())
          .collect();
        Ok(rows)
      })
      .map(|rows| {
        rows
          .iter()
          .filter_map(|data| serde_json::from_slice(data).ok())
          .collect()
      })
      .unwrap_or_default()
  }
}

fn insert_entity<T: Entity>(conn: &Connection, record: &T) -> rusqlite::Result<()> {
  let data = serde_json::to_vec(record)
    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

  conn.execute(
    "INSERT OR REPLACE INTO entities (collection, id, parent_id, data, seq)
     VALUES (?, ?, ?, ?, (SELECT IFNULL(MAX(seq), 0) + 1 FROM entities))",
    params![T::collection(), record.id(), record.parent_id(), data],
  )?;

  Ok(())
}

fn deserialize_entity<T: Entity>(data: &[u8]) -> Option<T> {
  match serde_json::from_slice(data) {
    Ok(entity) => Some(entity),
    Err(e) => {
      warn!(collection = T::collection(), error = %e, "dropping undecodable cached entity");
      None
    }
  }
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> rusqlite::Result<Option<T>> {
  match err {
    rusqlite::Error::QueryReturnedNoRows => Ok(None),
    other => Err(other),
  }
}
