//! Offline-first data layer for a restaurant browsing and review app.
//!
//! The crate provides:
//! - a capacity-bounded persistent cache of restaurants and reviews
//!   ([`store::PersistentStore`]),
//! - stateless HTTP access to the remote data service
//!   ([`gateway::HttpGateway`]),
//! - a read path that races the cache against the network and refreshes the
//!   cache in the background ([`reconciler::ReadReconciler`]),
//! - a durable queue of review submissions that failed, resubmitted until the
//!   server confirms them ([`queue::PendingWriteQueue`]),
//! - a page/asset request cache with an offline image placeholder
//!   ([`request_cache::RequestCache`]),
//!
//! all tied together by the [`client::RestaurantClient`] facade.

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod queue;
pub mod reconciler;
pub mod request_cache;
pub mod store;
pub mod types;

pub use client::{RestaurantClient, SubmitOutcome};
pub use config::Config;
pub use error::Error;
pub use types::{PendingReview, Restaurant, Review, ReviewDraft};
