//! Consumer-facing facade wiring the store, gateway, reconciler, and queue
//! together behind one API surface.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, HttpGateway};
use crate::queue::PendingWriteQueue;
use crate::reconciler::ReadReconciler;
use crate::store::PersistentStore;
use crate::types::{PendingReview, Restaurant, Review, ReviewDraft};

/// What happened to a submitted review.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// The server confirmed the write synchronously.
  Confirmed(Review),
  /// The network failed; the review is durably queued and will be
  /// resubmitted until confirmed.
  Queued(PendingReview),
}

pub struct RestaurantClient {
  store: Arc<PersistentStore>,
  gateway: Arc<dyn Gateway>,
  reconciler: ReadReconciler,
  queue: PendingWriteQueue,
  restaurant_cap: usize,
  review_cap: usize,
}

impl RestaurantClient {
  /// Build a client from configuration, opening the default local database.
  ///
  /// Also returns the receiver on which queued-review confirmations arrive.
  pub fn new(config: &Config) -> Result<(Self, mpsc::UnboundedReceiver<Review>)> {
    let store = match Config::default_data_path() {
      Ok(path) => Arc::new(PersistentStore::open(&path)),
      Err(e) => {
        warn!(error = %e, "no data directory, running without a local cache");
        Arc::new(PersistentStore::disabled())
      }
    };
    let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(config)?);

    Ok(Self::from_parts(store, gateway, config))
  }

  /// Build a client from injected parts. Used by tests and anything that
  /// wants its own storage location or gateway.
  pub fn from_parts(
    store: Arc<PersistentStore>,
    gateway: Arc<dyn Gateway>,
    config: &Config,
  ) -> (Self, mpsc::UnboundedReceiver<Review>) {
    let reconciler = ReadReconciler::new(
      Arc::clone(&store),
      Arc::clone(&gateway),
      config.cache.clone(),
    );
    let (queue, confirmations) = PendingWriteQueue::new(
      Arc::clone(&store),
      Arc::clone(&gateway),
      config.sync.retry_delay(),
      config.cache.review_cap,
    );

    (
      Self {
        store,
        gateway,
        reconciler,
        queue,
        restaurant_cap: config.cache.restaurant_cap,
        review_cap: config.cache.review_cap,
      },
      confirmations,
    )
  }

  /// All restaurants, cache-first. See [`ReadReconciler::restaurants`].
  pub async fn restaurants(&self) -> Result<Vec<Restaurant>> {
    self.reconciler.restaurants().await
  }

  pub async fn restaurant_by_id(&self, id: i64) -> Result<Restaurant> {
    self.reconciler.restaurant_by_id(id).await
  }

  pub async fn reviews_for(&self, restaurant_id: i64) -> Result<Vec<Review>> {
    self.reconciler.reviews_for(restaurant_id).await
  }

  /// Restaurants filtered by cuisine and/or neighborhood. Derived by
  /// filtering the one memoized collection fetch, never by extra requests.
  pub async fn filter_restaurants(
    &self,
    cuisine: Option<&str>,
    neighborhood: Option<&str>,
  ) -> Result<Vec<Restaurant>> {
    let mut restaurants = self.restaurants().await?;

    if let Some(cuisine) = cuisine {
      restaurants.retain(|r| r.cuisine_type == cuisine);
    }
    if let Some(neighborhood) = neighborhood {
      restaurants.retain(|r| r.neighborhood == neighborhood);
    }

    Ok(restaurants)
  }

  /// Distinct cuisine types, in first-seen order.
  pub async fn cuisines(&self) -> Result<Vec<String>> {
    let restaurants = self.restaurants().await?;
    Ok(distinct(restaurants.into_iter().map(|r| r.cuisine_type)))
  }

  /// Distinct neighborhoods, in first-seen order.
  pub async fn neighborhoods(&self) -> Result<Vec<String>> {
    let restaurants = self.restaurants().await?;
    Ok(distinct(restaurants.into_iter().map(|r| r.neighborhood)))
  }

  /// Submit a review.
  ///
  /// Validation failures surface synchronously, before any network or
  /// storage work. A network failure never surfaces: the review becomes a
  /// queued obligation that is resubmitted until the server confirms it.
  pub async fn submit_review(&self, draft: ReviewDraft) -> Result<SubmitOutcome> {
    draft.validate()?;

    match self.gateway.post_review(&draft).await {
      Ok(review) => {
        self.store.upsert(&review);
        self.store.evict_excess::<Review>(self.review_cap);
        Ok(SubmitOutcome::Confirmed(review))
      }
      Err(Error::Network { reason, .. }) => {
        warn!(%reason, "review submission failed, queueing for retry");
        Ok(SubmitOutcome::Queued(self.queue.enqueue(draft)))
      }
      Err(other) => Err(other),
    }
  }

  /// Toggle the favorite flag. A synchronous write-through: unlike reviews,
  /// favorites are not queued for retry.
  pub async fn set_favorite(&self, id: i64, is_favorite: bool) -> Result<Restaurant> {
    let restaurant = self.gateway.set_favorite(id, is_favorite).await?;

    self.store.upsert(&restaurant);
    self.store.evict_excess::<Restaurant>(self.restaurant_cap);

    Ok(restaurant)
  }

  /// Reviews still awaiting server confirmation, in enqueue order.
  pub fn pending_reviews(&self) -> Vec<PendingReview> {
    self.queue.list_pending()
  }
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<String> {
  let mut seen: Vec<String> = Vec::new();
  for value in values {
    if !seen.contains(&value) {
      seen.push(value);
    }
  }
  seen
}
