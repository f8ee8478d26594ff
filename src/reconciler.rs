//! Resolves reads by racing the local store against the network.
//!
//! The cache side wins deterministically whenever it holds data; the network
//! result always refreshes the store once it settles, so the cache improves
//! for the next call even when the current call already returned. Collection
//! fetches are memoized for the lifetime of the reconciler: data is
//! deliberately not refreshed mid-session.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::store::PersistentStore;
use crate::types::{Restaurant, Review};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<Vec<T>>>>;

pub struct ReadReconciler {
  store: Arc<PersistentStore>,
  gateway: Arc<dyn Gateway>,
  caps: CacheConfig,
  /// One shared fetch per session for the restaurant collection.
  restaurants_memo: Mutex<Option<SharedFetch<Restaurant>>>,
  /// One shared fetch per restaurant id for its reviews.
  reviews_memo: Mutex<HashMap<i64, SharedFetch<Review>>>,
}

impl ReadReconciler {
  pub fn new(store: Arc<PersistentStore>, gateway: Arc<dyn Gateway>, caps: CacheConfig) -> Self {
    Self {
      store,
      gateway,
      caps,
      restaurants_memo: Mutex::new(None),
      reviews_memo: Mutex::new(HashMap::new()),
    }
  }

  /// Fetch the restaurant collection, cache-first with a live network race.
  ///
  /// Every call after the first within this reconciler's lifetime returns the
  /// same resolved set without touching the network again.
  pub async fn restaurants(&self) -> Result<Vec<Restaurant>> {
    let fetch = {
      let mut memo = self.restaurants_memo.lock().await;
      memo
        .get_or_insert_with(|| {
          restaurants_fetch(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.caps.restaurant_cap,
          )
        })
        .clone()
    };

    fetch.await
  }

  /// Fetch the reviews for one restaurant, memoized per restaurant id.
  pub async fn reviews_for(&self, restaurant_id: i64) -> Result<Vec<Review>> {
    let fetch = {
      let mut memo = self.reviews_memo.lock().await;
      memo
        .entry(restaurant_id)
        .or_insert_with(|| {
          reviews_fetch(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            restaurant_id,
            self.caps.review_cap,
          )
        })
        .clone()
    };

    fetch.await
  }

  /// Fetch a single restaurant. A cached record wins immediately; the network
  /// result still refreshes the store. Not memoized.
  pub async fn restaurant_by_id(&self, id: i64) -> Result<Restaurant> {
    let net = {
      let gateway = Arc::clone(&self.gateway);
      async move { gateway.fetch_restaurant(id).await }
    }
    .boxed()
    .shared();

    tokio::spawn({
      let net = net.clone();
      let store = Arc::clone(&self.store);
      let cap = self.caps.restaurant_cap;
      async move {
        if let Ok(restaurant) = net.await {
          store.upsert(&restaurant);
          store.evict_excess::<Restaurant>(cap);
        }
      }
    });

    if let Some(cached) = self.store.get_by_id::<Restaurant>(id) {
      debug!(id, "serving restaurant from cache");
      return Ok(cached);
    }

    net.await
  }
}

fn restaurants_fetch(
  store: Arc<PersistentStore>,
  gateway: Arc<dyn Gateway>,
  cap: usize,
) -> SharedFetch<Restaurant> {
  async move {
    let net = async move { gateway.fetch_restaurants().await }.boxed().shared();

    // Refresh the cache once the network settles, win or lose the race below.
    tokio::spawn({
      let net = net.clone();
      let store = Arc::clone(&store);
      async move {
        if let Ok(restaurants) = net.await {
          store.upsert_all(&restaurants);
          store.evict_excess::<Restaurant>(cap);
        }
      }
    });

    let cached = store.get_all::<Restaurant>();
    if !cached.is_empty() {
      debug!(count = cached.len(), "serving restaurants from cache");
      return Ok(cached);
    }

    net.await
  }
  .boxed()
  .shared()
}

fn reviews_fetch(
  store: Arc<PersistentStore>,
  gateway: Arc<dyn Gateway>,
  restaurant_id: i64,
  cap: usize,
) -> SharedFetch<Review> {
  async move {
    let net = async move { gateway.fetch_reviews(restaurant_id).await }
      .boxed()
      .shared();

    tokio::spawn({
      let net = net.clone();
      let store = Arc::clone(&store);
      async move {
        if let Ok(reviews) = net.await {
          store.upsert_all(&reviews);
          store.evict_excess::<Review>(cap);
        }
      }
    });

    let cached = store.get_by_parent::<Review>(restaurant_id);
    if !cached.is_empty() {
      debug!(restaurant_id, count = cached.len(), "serving reviews from cache");
      return Ok(cached);
    }

    net.await
  }
  .boxed()
  .shared()
}
