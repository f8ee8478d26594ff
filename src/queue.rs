//! Durable queue of unconfirmed review submissions with automatic
//! resubmission.
//!
//! Entries move Queued -> Submitting -> Confirmed (removed), or back to
//! Queued on failure. Only a server confirmation ever removes an entry; a
//! failed or timed-out attempt just schedules another sweep. The queue owns
//! at most one outstanding resubmission timer at a time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;
use crate::store::PersistentStore;
use crate::types::{PendingReview, Review, ReviewDraft};

/// Cheaply cloneable handle to the queue; all state lives behind an Arc so
/// spawned sweeps share it.
#[derive(Clone)]
pub struct PendingWriteQueue {
  inner: Arc<QueueInner>,
}

struct QueueInner {
  store: Arc<PersistentStore>,
  gateway: Arc<dyn Gateway>,
  delay: Duration,
  review_cap: usize,
  /// Authoritative runtime copy of the queue. The store mirrors it for
  /// durability; when storage is degraded this is all there is.
  pending: Mutex<Vec<PendingReview>>,
  /// Handle of the one outstanding timer/sweep task, if any.
  timer: Mutex<Option<JoinHandle<()>>>,
  confirmations: mpsc::UnboundedSender<Review>,
}

impl PendingWriteQueue {
  /// Build the queue, reloading any entries that survived a previous process.
  ///
  /// Returns the queue and the receiver on which server confirmations are
  /// delivered (in completion order, not enqueue order). If reloaded entries
  /// exist, a resubmission sweep is armed immediately.
  pub fn new(
    store: Arc<PersistentStore>,
    gateway: Arc<dyn Gateway>,
    delay: Duration,
    review_cap: usize,
  ) -> (Self, mpsc::UnboundedReceiver<Review>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reloaded = store.list_pending();

    let queue = Self {
      inner: Arc::new(QueueInner {
        store,
        gateway,
        delay,
        review_cap,
        pending: Mutex::new(reloaded),
        timer: Mutex::new(None),
        confirmations: tx,
      }),
    };

    let reloaded = queue.list_pending().len();
    if reloaded > 0 {
      info!(count = reloaded, "reloaded unconfirmed reviews, arming sweep");
      QueueInner::arm(&queue.inner, false);
    }

    (queue, rx)
  }

  /// Durably queue a review for later delivery and make sure a resubmission
  /// sweep is scheduled.
  pub fn enqueue(&self, draft: ReviewDraft) -> PendingReview {
    let pending = PendingReview::new(draft);

    self.inner.store.put_pending(&pending);
    lock(&self.inner.pending).push(pending.clone());
    debug!(correlation_id = %pending.correlation_id, "queued review for later submission");

    QueueInner::arm(&self.inner, false);
    pending
  }

  /// The current queued sequence, for "awaiting sync" display.
  pub fn list_pending(&self) -> Vec<PendingReview> {
    lock(&self.inner.pending).clone()
  }
}

impl QueueInner {
  /// Arm the resubmission timer.
  ///
  /// With `replace: false` this is a no-op while a timer or sweep is already
  /// outstanding, so concurrent enqueues never stack timers. The completed
  /// sweep re-arms itself with `replace: true`, swapping out its own finished
  /// handle.
  fn arm(this: &Arc<Self>, replace: bool) {
    let mut slot = lock(&this.timer);

    if !replace {
      if let Some(handle) = slot.as_ref() {
        if !handle.is_finished() {
          return;
        }
      }
    }

    let inner = Arc::clone(this);
    *slot = Some(tokio::spawn(async move {
      tokio::time::sleep(inner.delay).await;

      let all_confirmed = Self::sweep(&inner).await;
      let still_pending = !lock(&inner.pending).is_empty();

      // Entries that failed, or that arrived while this sweep was running,
      // get another pass after the same fixed delay.
      if !all_confirmed || still_pending {
        Self::arm(&inner, true);
      }
    }));
  }

  /// One pass over a snapshot of the queue: every entry is submitted
  /// concurrently and independently. Returns whether every attempt succeeded.
  async fn sweep(this: &Arc<Self>) -> bool {
    let snapshot = lock(&this.pending).clone();
    if snapshot.is_empty() {
      return true;
    }

    info!(count = snapshot.len(), "resubmitting queued reviews");

    let attempts = snapshot.into_iter().map(|entry| {
      let inner = Arc::clone(this);
      async move {
        match inner.gateway.post_review(&entry.draft).await {
          Ok(review) => {
            inner.confirm(&entry.correlation_id, review);
            true
          }
          Err(e) => {
            warn!(correlation_id = %entry.correlation_id, error = %e, "resubmission failed, keeping entry queued");
            false
          }
        }
      }
    });

    futures::future::join_all(attempts)
      .await
      .into_iter()
      .all(|confirmed| confirmed)
  }

  /// Remove a confirmed entry everywhere and publish the canonical record.
  fn confirm(&self, correlation_id: &str, review: Review) {
    lock(&self.pending).retain(|p| p.correlation_id != correlation_id);
    self.store.remove_pending(correlation_id);

    self.store.upsert(&review);
    self.store.evict_excess::<Review>(self.review_cap);

    debug!(correlation_id, review_id = review.id, "review confirmed by server");
    // The receiver being gone just means nobody is listening for
    // confirmations anymore.
    let _ = self.confirmations.send(review);
  }
}

/// Mutex lock that shrugs off poisoning: queue state stays usable even if a
/// task panicked while holding the guard.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{Error, Result};
  use crate::types::Restaurant;
  use async_trait::async_trait;
  use chrono::Utc;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  /// Gateway whose post_review can be toggled between failing and confirming.
  struct FlakyGateway {
    online: AtomicBool,
    posts: AtomicUsize,
    /// Names whose submissions always fail, even when online.
    reject_names: Vec<String>,
    next_id: AtomicUsize,
  }

  impl FlakyGateway {
    fn offline() -> Self {
      Self {
        online: AtomicBool::new(false),
        posts: AtomicUsize::new(0),
        reject_names: Vec::new(),
        next_id: AtomicUsize::new(100),
      }
    }

    fn online() -> Self {
      let gateway = Self::offline();
      gateway.online.store(true, Ordering::SeqCst);
      gateway
    }

    fn rejecting(name: &str) -> Self {
      let mut gateway = Self::online();
      gateway.reject_names.push(name.to_string());
      gateway
    }

    fn go_online(&self) {
      self.online.store(true, Ordering::SeqCst);
    }
  }

  #[async_trait]
  impl Gateway for FlakyGateway {
    async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>> {
      unreachable!("the queue never reads")
    }

    async fn fetch_restaurant(&self, _id: i64) -> Result<Restaurant> {
      unreachable!("the queue never reads")
    }

    async fn fetch_reviews(&self, _restaurant_id: i64) -> Result<Vec<Review>> {
      unreachable!("the queue never reads")
    }

    async fn post_review(&self, draft: &ReviewDraft) -> Result<Review> {
      self.posts.fetch_add(1, Ordering::SeqCst);

      if !self.online.load(Ordering::SeqCst) || self.reject_names.contains(&draft.name) {
        return Err(Error::network("connection refused"));
      }

      Ok(Review {
        id: self.next_id.fetch_add(1, Ordering::SeqCst) as i64,
        restaurant_id: draft.restaurant_id,
        name: draft.name.clone(),
        rating: draft.rating,
        comments: draft.comments.clone(),
        created_at: Utc::now(),
      })
    }

    async fn set_favorite(&self, _id: i64, _is_favorite: bool) -> Result<Restaurant> {
      unreachable!("the queue never toggles favorites")
    }
  }

  fn draft(name: &str) -> ReviewDraft {
    ReviewDraft {
      restaurant_id: 3,
      name: name.to_string(),
      rating: 4,
      comments: "Lovely".to_string(),
    }
  }

  const DELAY: Duration = Duration::from_secs(3);

  /// Jump past the sweep delay and let the sweep task run.
  async fn run_one_sweep() {
    tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
    for _ in 0..8 {
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test(start_paused = true)]
  async fn entry_survives_failed_sweeps_until_the_network_recovers() {
    let gateway = Arc::new(FlakyGateway::offline());
    let store = Arc::new(PersistentStore::in_memory());
    let (queue, mut confirmations) = PendingWriteQueue::new(
      Arc::clone(&store),
      Arc::clone(&gateway) as Arc<dyn Gateway>,
      DELAY,
      15,
    );

    queue.enqueue(draft("Ana"));

    // One failed sweep: the entry is still queued.
    run_one_sweep().await;
    assert_eq!(queue.list_pending().len(), 1);
    assert_eq!(gateway.posts.load(Ordering::SeqCst), 1);

    // Network comes back; the next sweep confirms and removes it.
    gateway.go_online();
    run_one_sweep().await;
    assert!(queue.list_pending().is_empty());

    let confirmed = confirmations.try_recv().expect("exactly one confirmation");
    assert_eq!(confirmed.name, "Ana");
    assert_eq!(confirmed.id, 100);
    assert!(confirmations.try_recv().is_err());

    // The canonical record landed in the reviews collection.
    assert_eq!(store.get_by_parent::<Review>(3).len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn successful_entry_is_never_retried_while_the_failing_one_reschedules() {
    let gateway = Arc::new(FlakyGateway::rejecting("Grump"));
    let store = Arc::new(PersistentStore::in_memory());
    let (queue, mut confirmations) =
      PendingWriteQueue::new(store, Arc::clone(&gateway) as Arc<dyn Gateway>, DELAY, 15);

    queue.enqueue(draft("Ana"));
    queue.enqueue(draft("Grump"));

    // First sweep: both attempted, Ana confirmed, Grump kept.
    run_one_sweep().await;
    assert_eq!(gateway.posts.load(Ordering::SeqCst), 2);
    assert_eq!(queue.list_pending().len(), 1);
    assert_eq!(confirmations.try_recv().unwrap().name, "Ana");

    // Two more sweeps: only Grump is retried, at the fixed delay.
    run_one_sweep().await;
    run_one_sweep().await;
    assert_eq!(gateway.posts.load(Ordering::SeqCst), 4);
    assert_eq!(queue.list_pending().len(), 1);
    assert_eq!(queue.list_pending()[0].draft.name, "Grump");
    assert!(confirmations.try_recv().is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn enqueue_while_a_timer_is_armed_does_not_stack_sweeps() {
    let gateway = Arc::new(FlakyGateway::online());
    let store = Arc::new(PersistentStore::in_memory());
    let (queue, _confirmations) =
      PendingWriteQueue::new(store, Arc::clone(&gateway) as Arc<dyn Gateway>, DELAY, 15);

    queue.enqueue(draft("Ana"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    queue.enqueue(draft("Bo"));

    // A single sweep window submits both entries exactly once.
    run_one_sweep().await;
    assert_eq!(gateway.posts.load(Ordering::SeqCst), 2);
    assert!(queue.list_pending().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn queued_entries_are_reloaded_after_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = Arc::new(PersistentStore::open(&path));
      let gateway = Arc::new(FlakyGateway::offline());
      let (queue, _rx) = PendingWriteQueue::new(store, gateway, DELAY, 15);
      queue.enqueue(draft("Ana"));
      // Process "dies" here without a confirmation.
    }

    let store = Arc::new(PersistentStore::open(&path));
    let gateway = Arc::new(FlakyGateway::online());
    let (queue, mut confirmations) = PendingWriteQueue::new(store, gateway, DELAY, 15);

    // Reloaded and armed without any new enqueue.
    assert_eq!(queue.list_pending().len(), 1);
    run_one_sweep().await;
    assert!(queue.list_pending().is_empty());
    assert_eq!(confirmations.try_recv().unwrap().name, "Ana");
  }

  #[tokio::test(start_paused = true)]
  async fn degraded_storage_still_queues_in_memory() {
    let gateway = Arc::new(FlakyGateway::offline());
    let (queue, _rx) = PendingWriteQueue::new(
      Arc::new(PersistentStore::disabled()),
      Arc::clone(&gateway) as Arc<dyn Gateway>,
      DELAY,
      15,
    );

    queue.enqueue(draft("Ana"));
    assert_eq!(queue.list_pending().len(), 1);

    gateway.go_online();
    run_one_sweep().await;
    assert!(queue.list_pending().is_empty());
  }
}
