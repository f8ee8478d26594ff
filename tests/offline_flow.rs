//! End-to-end offline/online journey across the store, reconciler, queue,
//! and facade.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bistro::client::RestaurantClient;
use bistro::config::Config;
use bistro::error::{Error, Result};
use bistro::gateway::Gateway;
use bistro::store::PersistentStore;
use bistro::types::{LatLng, Restaurant, Review, ReviewDraft};
use bistro::SubmitOutcome;

fn restaurant(id: i64) -> Restaurant {
  Restaurant {
    id,
    name: format!("Place {}", id),
    cuisine_type: "Pizza".to_string(),
    neighborhood: "Brooklyn".to_string(),
    address: "1 Main St".to_string(),
    latlng: LatLng { lat: 40.7, lng: -73.9 },
    operating_hours: Default::default(),
    photograph: Some("1.jpg".to_string()),
    is_favorite: false,
  }
}

/// A remote service whose connectivity can be flipped at runtime.
struct ToggleGateway {
  online: AtomicBool,
  next_review_id: AtomicI64,
}

impl ToggleGateway {
  fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
      next_review_id: AtomicI64::new(500),
    }
  }

  fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  fn check(&self) -> Result<()> {
    if self.online.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(Error::network("connection refused"))
    }
  }
}

#[async_trait]
impl Gateway for ToggleGateway {
  async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>> {
    self.check()?;
    Ok(vec![restaurant(1), restaurant(2)])
  }

  async fn fetch_restaurant(&self, id: i64) -> Result<Restaurant> {
    self.check()?;
    Ok(restaurant(id))
  }

  async fn fetch_reviews(&self, _restaurant_id: i64) -> Result<Vec<Review>> {
    self.check()?;
    Ok(Vec::new())
  }

  async fn post_review(&self, draft: &ReviewDraft) -> Result<Review> {
    self.check()?;
    Ok(Review {
      id: self.next_review_id.fetch_add(1, Ordering::SeqCst),
      restaurant_id: draft.restaurant_id,
      name: draft.name.clone(),
      rating: draft.rating,
      comments: draft.comments.clone(),
      created_at: Utc::now(),
    })
  }

  async fn set_favorite(&self, id: i64, is_favorite: bool) -> Result<Restaurant> {
    self.check()?;
    let mut updated = restaurant(id);
    updated.is_favorite = is_favorite;
    Ok(updated)
  }
}

async fn settle() {
  for _ in 0..8 {
    tokio::task::yield_now().await;
  }
}

#[tokio::test(start_paused = true)]
async fn browsing_and_reviewing_survive_going_offline() {
  let config = Config::default();
  let store = Arc::new(PersistentStore::in_memory());
  let gateway = Arc::new(ToggleGateway::new(true));

  // First session, online: the network populates the cache.
  {
    let (client, _rx) = RestaurantClient::from_parts(
      Arc::clone(&store),
      Arc::clone(&gateway) as Arc<dyn Gateway>,
      &config,
    );
    let listed = client.restaurants().await.unwrap();
    assert_eq!(listed.len(), 2);
    settle().await;
    assert_eq!(store.get_all::<Restaurant>().len(), 2);
  }

  // Connectivity drops before the next session starts.
  gateway.set_online(false);

  let (client, mut confirmations) = RestaurantClient::from_parts(
    Arc::clone(&store),
    Arc::clone(&gateway) as Arc<dyn Gateway>,
    &config,
  );

  // Reads still answer from the cache; the failed refresh is swallowed.
  let listed = client.restaurants().await.unwrap();
  assert_eq!(listed.len(), 2);
  let detail = client.restaurant_by_id(1).await.unwrap();
  assert_eq!(detail.id, 1);

  // A review submitted offline is accepted as a queued obligation.
  let outcome = client
    .submit_review(ReviewDraft {
      restaurant_id: 1,
      name: "Ana".to_string(),
      rating: 5,
      comments: "Best slice in Brooklyn".to_string(),
    })
    .await
    .unwrap();
  let pending = match outcome {
    SubmitOutcome::Queued(pending) => pending,
    other => panic!("expected a queued outcome, got {:?}", other),
  };
  assert_eq!(client.pending_reviews().len(), 1);

  // First resubmission sweep fires while still offline: entry is kept.
  tokio::time::sleep(config.sync.retry_delay() + Duration::from_millis(10)).await;
  settle().await;
  assert_eq!(client.pending_reviews().len(), 1);

  // Connectivity returns; the next sweep delivers and confirms the review.
  gateway.set_online(true);
  tokio::time::sleep(config.sync.retry_delay() + Duration::from_millis(10)).await;
  settle().await;

  assert!(client.pending_reviews().is_empty());
  let confirmed = confirmations.try_recv().expect("one confirmation");
  assert_eq!(confirmed.id, 500);
  assert_eq!(confirmed.restaurant_id, pending.draft.restaurant_id);
  assert!(confirmations.try_recv().is_err());

  // The canonical record is durably cached with the reviews.
  assert_eq!(store.get_by_parent::<Review>(1).len(), 1);
}

#[tokio::test]
async fn a_session_with_no_cache_and_no_network_surfaces_a_network_error() {
  let (client, _rx) = RestaurantClient::from_parts(
    Arc::new(PersistentStore::in_memory()),
    Arc::new(ToggleGateway::new(false)),
    &Config::default(),
  );

  let err = client.restaurants().await.unwrap_err();
  assert!(matches!(err, Error::Network { .. }));
}

#[tokio::test]
async fn degraded_storage_falls_back_to_network_only_reads() {
  let (client, _rx) = RestaurantClient::from_parts(
    Arc::new(PersistentStore::disabled()),
    Arc::new(ToggleGateway::new(true)),
    &Config::default(),
  );

  let listed = client.restaurants().await.unwrap();
  assert_eq!(listed.len(), 2);
}
