//! Stateless HTTP access to the remote data service.

use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Restaurant, Review, ReviewDraft};

/// Network side of the data layer. No caching, no retry; callers own
/// retry policy.
#[async_trait]
pub trait Gateway: Send + Sync {
  /// `GET /restaurants`
  async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>>;

  /// `GET /restaurants/{id}`
  async fn fetch_restaurant(&self, id: i64) -> Result<Restaurant>;

  /// `GET /reviews?restaurant_id={id}`
  async fn fetch_reviews(&self, restaurant_id: i64) -> Result<Vec<Review>>;

  /// `POST /reviews` — returns the record with its server-assigned id and
  /// timestamp.
  async fn post_review(&self, draft: &ReviewDraft) -> Result<Review>;

  /// `POST /restaurants/{id}?is_favorite={bool}` — returns the full updated
  /// restaurant.
  async fn set_favorite(&self, id: i64, is_favorite: bool) -> Result<Restaurant>;
}

/// reqwest-backed implementation against the service described in the config.
#[derive(Clone)]
pub struct HttpGateway {
  base_url: Url,
  client: reqwest::Client,
}

impl HttpGateway {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(&config.api.url)
  }

  pub fn with_base_url(base_url: &str) -> Result<Self> {
    let base_url = Url::parse(base_url)
      .map_err(|e| Error::network(format!("invalid API base url {}: {}", base_url, e)))?;

    Ok(Self {
      base_url,
      client: reqwest::Client::new(),
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| Error::network(format!("invalid endpoint {}: {}", path, e)))
  }

  async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
      return Err(Error::Network {
        reason: format!("server answered {}", status),
        status: Some(status.as_u16()),
      });
    }

    response.json::<T>().await.map_err(Error::from)
  }
}

#[async_trait]
impl Gateway for HttpGateway {
  async fn fetch_restaurants(&self) -> Result<Vec<Restaurant>> {
    let url = self.endpoint("/restaurants")?;
    let response = self.client.get(url).send().await?;
    Self::decode(response).await
  }

  async fn fetch_restaurant(&self, id: i64) -> Result<Restaurant> {
    let url = self.endpoint(&format!("/restaurants/{}", id))?;
    let response = self.client.get(url).send().await?;
    Self::decode(response).await
  }

  async fn fetch_reviews(&self, restaurant_id: i64) -> Result<Vec<Review>> {
    let mut url = self.endpoint("/reviews")?;
    url
      .query_pairs_mut()
      .append_pair("restaurant_id", &restaurant_id.to_string());
    let response = self.client.get(url).send().await?;
    Self::decode(response).await
  }

  async fn post_review(&self, draft: &ReviewDraft) -> Result<Review> {
    let url = self.endpoint("/reviews")?;
    let response = self.client.post(url).json(draft).send().await?;
    Self::decode(response).await
  }

  async fn set_favorite(&self, id: i64, is_favorite: bool) -> Result<Restaurant> {
    let mut url = self.endpoint(&format!("/restaurants/{}", id))?;
    url
      .query_pairs_mut()
      .append_pair("is_favorite", if is_favorite { "true" } else { "false" });
    let response = self.client.post(url).send().await?;
    Self::decode(response).await
  }
}
