//! Request-interception cache for page and asset delivery.
//!
//! Operates at the resource-URL level, independent of the entity cache: every
//! same-origin request is classified and served under one of four policies,
//! while cross-origin requests bypass the layer entirely. Entries live in
//! named caches inside a dedicated database; the static cache name carries a
//! version token so activation can reclaim superseded installs.

use rusqlite::{params, Connection};
use std::future::Future;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

/// Versioned static cache. Bump the version token when the manifest changes.
pub const STATIC_CACHE_NAME: &str = "restaurant-reviews-static-v1";

/// Dynamically populated image cache; unversioned, reused across installs.
pub const IMAGE_CACHE_NAME: &str = "restaurant-reviews-images";

/// Build-synchronized list of resources cached eagerly at install time.
/// A mismatch with the deployed assets leaves a silent gap for that resource.
pub const STATIC_MANIFEST: &[&str] = &[
  "/",
  "/restaurant.html",
  "/home.js",
  "/restaurant.js",
  "/home-styles.css",
  "/restaurant-styles.css",
  "/style/logo.svg",
  "/style/no_photo.svg",
  "/style/loading_image.svg",
  "/style/no_connection.svg",
  "/manifest.webmanifest",
];

/// Served in place of an image that is neither cached nor reachable.
pub const OFFLINE_PLACEHOLDER: &str = "/style/no_connection.svg";

const IMAGE_PREFIX: &str = "/img/";
const SHELL_ROUTE: &str = "/restaurant.html";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS request_cache (
    cache_name TEXT NOT NULL,
    url_key TEXT NOT NULL,
    content_type TEXT NOT NULL,
    body BLOB NOT NULL,
    PRIMARY KEY (cache_name, url_key)
);
"#;

/// How an intercepted request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Fixed-manifest resource: cache-first, never network after install.
  StaticAsset,
  /// `/img/` resource: cache-first by exact URL, placeholder on failure.
  ImageAsset,
  /// Detail-view route: the one cached shell document, query string ignored.
  DynamicShellPage,
  /// Any other same-origin request: cache-first, else network, no write-back.
  Passthrough,
  /// Not ours; bypasses this layer entirely.
  CrossOrigin,
}

/// A cached (or fetched) resource body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub body: Vec<u8>,
  pub content_type: String,
}

pub struct RequestCache {
  origin: Url,
  conn: Mutex<Connection>,
}

impl RequestCache {
  /// Open or create the request cache database.
  pub fn open(origin: Url, path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!("failed to create cache directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "failed to open request cache at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| Error::StorageUnavailable(format!("failed to run cache migration: {}", e)))?;

    Ok(Self {
      origin,
      conn: Mutex::new(conn),
    })
  }

  /// In-memory request cache, used in tests.
  pub fn in_memory(origin: Url) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| Error::StorageUnavailable(e.to_string()))?;

    Ok(Self {
      origin,
      conn: Mutex::new(conn),
    })
  }

  /// Classify an intercepted request.
  pub fn classify(&self, url: &Url) -> RequestClass {
    if url.origin() != self.origin.origin() {
      return RequestClass::CrossOrigin;
    }

    let path = url.path();
    if path.starts_with(IMAGE_PREFIX) {
      return RequestClass::ImageAsset;
    }
    if path.starts_with(SHELL_ROUTE) {
      return RequestClass::DynamicShellPage;
    }
    if STATIC_MANIFEST.contains(&path) {
      return RequestClass::StaticAsset;
    }

    RequestClass::Passthrough
  }

  /// Eagerly fetch and cache the static manifest.
  ///
  /// All-or-nothing: if any fetch fails, nothing is written and the previous
  /// install (if any) stays intact. The fetcher receives each manifest path.
  pub async fn install<F, Fut>(&self, fetcher: F) -> Result<()>
  where
    F: Fn(&str) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let fetches = STATIC_MANIFEST.iter().map(|path| {
      let fut = fetcher(path);
      async move { Ok::<_, Error>((*path, fut.await?)) }
    });

    let responses: Vec<(&str, CachedResponse)> = futures::future::try_join_all(fetches).await?;

    let conn = lock(&self.conn);
    let result: rusqlite::Result<()> = (|| {
      conn.execute("BEGIN TRANSACTION", [])?;
      for (path, response) in &responses {
        if let Err(e) = insert_entry(&conn, STATIC_CACHE_NAME, path, response) {
          conn.execute("ROLLBACK", [])?;
          return Err(e);
        }
      }
      conn.execute("COMMIT", [])?;
      Ok(())
    })();

    result.map_err(|e| Error::StorageUnavailable(format!("failed to install static cache: {}", e)))?;

    info!(resources = STATIC_MANIFEST.len(), cache = STATIC_CACHE_NAME, "static cache installed");
    Ok(())
  }

  /// Reclaim caches left behind by previous installs: every cache name other
  /// than the current static and image names is deleted.
  pub fn activate(&self) {
    let conn = lock(&self.conn);
    match conn.execute(
      "DELETE FROM request_cache WHERE cache_name NOT IN (?, ?)",
      params![STATIC_CACHE_NAME, IMAGE_CACHE_NAME],
    ) {
      Ok(deleted) if deleted > 0 => {
        info!(deleted, "removed entries from superseded caches");
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "cache activation cleanup failed"),
    }
  }

  /// Serve an intercepted request according to its class. The fetcher is the
  /// network side and is only invoked where the policy allows it.
  pub async fn handle<F, Fut>(&self, url: &Url, fetcher: F) -> Result<CachedResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    match self.classify(url) {
      RequestClass::CrossOrigin => fetcher().await,
      RequestClass::StaticAsset => self.serve_static(url),
      RequestClass::ImageAsset => self.serve_image(url, fetcher).await,
      RequestClass::DynamicShellPage => self.serve_shell(fetcher).await,
      RequestClass::Passthrough => self.serve_passthrough(url, fetcher).await,
    }
  }

  fn serve_static(&self, url: &Url) -> Result<CachedResponse> {
    let key = cache_key(url);
    // Static assets never fall through to the network after install; a miss
    // here means the manifest and the deployed assets disagree.
    self.get(STATIC_CACHE_NAME, &key).ok_or_else(|| {
      warn!(key = %key, "static asset missing from install cache");
      Error::network(format!("{} was not cached at install time", key))
    })
  }

  async fn serve_image<F, Fut>(&self, url: &Url, fetcher: F) -> Result<CachedResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let key = cache_key(url);
    if let Some(cached) = self.get(IMAGE_CACHE_NAME, &key) {
      return Ok(cached);
    }

    match fetcher().await {
      Ok(response) => {
        self.put(IMAGE_CACHE_NAME, &key, &response);
        Ok(response)
      }
      Err(e) => {
        debug!(key = %key, error = %e, "image unreachable, serving offline placeholder");
        self
          .get(STATIC_CACHE_NAME, OFFLINE_PLACEHOLDER)
          .ok_or(e)
      }
    }
  }

  async fn serve_shell<F, Fut>(&self, fetcher: F) -> Result<CachedResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    // Every detail-view request gets the one cached shell document, whatever
    // its query string says. The network is only a last resort for a cache
    // that was never installed.
    match self.get(STATIC_CACHE_NAME, SHELL_ROUTE) {
      Some(shell) => Ok(shell),
      None => fetcher().await,
    }
  }

  async fn serve_passthrough<F, Fut>(&self, url: &Url, fetcher: F) -> Result<CachedResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let key = cache_key(url);
    if let Some(cached) = self.match_any(&key) {
      return Ok(cached);
    }

    fetcher().await
  }

  /// Look up a key in one named cache. Storage failures read as misses.
  fn get(&self, cache_name: &str, key: &str) -> Option<CachedResponse> {
    let conn = lock(&self.conn);
    let result = conn.query_row(
      "SELECT content_type, body FROM request_cache WHERE cache_name = ? AND url_key = ?",
      params![cache_name, key],
      |row| {
        Ok(CachedResponse {
          content_type: row.get(0)?,
          body: row.get(1)?,
        })
      },
    );

    match result {
      Ok(response) => Some(response),
      Err(rusqlite::Error::QueryReturnedNoRows) => None,
      Err(e) => {
        warn!(cache_name, key, error = %e, "request cache lookup failed");
        None
      }
    }
  }

  /// Look up a key across the current caches, like a whole-cache match.
  fn match_any(&self, key: &str) -> Option<CachedResponse> {
    self
      .get(STATIC_CACHE_NAME, key)
      .or_else(|| self.get(IMAGE_CACHE_NAME, key))
  }

  /// Store a response clone. Failures are logged and swallowed; serving the
  /// response matters more than caching it.
  fn put(&self, cache_name: &str, key: &str, response: &CachedResponse) {
    let conn = lock(&self.conn);
    if let Err(e) = insert_entry(&conn, cache_name, key, response) {
      warn!(cache_name, key, error = %e, "failed to cache response");
    }
  }
}

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  key: &str,
  response: &CachedResponse,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO request_cache (cache_name, url_key, content_type, body)
     VALUES (?, ?, ?, ?)",
    params![cache_name, key, response.content_type, response.body],
  )?;
  Ok(())
}

/// Cache entries are keyed by path plus query, relative to the fixed origin.
fn cache_key(url: &Url) -> String {
  match url.query() {
    Some(query) => format!("{}?{}", url.path(), query),
    None => url.path().to_string(),
  }
}

fn lock(mutex: &Mutex<Connection>) -> std::sync::MutexGuard<'_, Connection> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
