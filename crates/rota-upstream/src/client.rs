//! [`UpstreamClient`]: an authenticated [`TransitFeed`].

use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use rota_core::{
  feed::TransitFeed,
  policy::Policy,
  time::UtcWindow,
  trip::TripSnapshot,
  violation::{NonConformity, PositionSample},
};
use serde::de::DeserializeOwned;

use crate::{
  Error, Result, UpstreamConfig, authenticate,
  wire::{
    GridFilter, GridItem, NonConformityItem, NonConformityRequest, OneOrMany, PositionItem,
    PositionRequest,
  },
};

const GRID_ENDPOINT: &str = "/GlobalBus/Grid/List";
const NON_CONFORMITY_ENDPOINT: &str = "/GlobalBus/Trip/TripsWithNonConformity";
const POSITION_ENDPOINT: &str = "/Controlws/HistoryPosition/List";

/// Bearer-authenticated access to the upstream service.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct UpstreamClient {
  client:              Client,
  config:              UpstreamConfig,
  token:               String,
  delay_tolerance:     u32,
  earliness_tolerance: u32,
}

impl UpstreamClient {
  /// Build the HTTP client and obtain a token.
  pub async fn connect(config: UpstreamConfig, policy: &Policy) -> Result<Self> {
    let client = Client::builder().timeout(config.timeout()).build()?;
    let token = authenticate(&client, &config).await?;
    tracing::debug!(base_url = %config.base_url, "authenticated against upstream");

    Ok(Self {
      client,
      config,
      token,
      delay_tolerance: policy.delay_tolerance_minutes,
      earliness_tolerance: policy.earliness_tolerance_minutes,
    })
  }

  fn post(&self, path: &str) -> reqwest::RequestBuilder {
    self.client.post(self.config.url(path)).bearer_auth(&self.token)
  }

  async fn decode<T: DeserializeOwned>(
    endpoint: &'static str,
    resp: reqwest::Response,
  ) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
      return Err(Error::Status { endpoint, status });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| Error::Decode { endpoint, source })
  }
}

impl TransitFeed for UpstreamClient {
  type Error = Error;

  /// `POST /GlobalBus/Grid/List?paramClientIntegrationCode=<code>`
  async fn trip_grid(&self, date: NaiveDate) -> Result<Vec<TripSnapshot>> {
    let resp = self
      .post(GRID_ENDPOINT)
      .query(&[("paramClientIntegrationCode", &self.config.client_integration_code)])
      .json(&GridFilter::effective_date(date))
      .send()
      .await?;

    let items: Option<Vec<GridItem>> = Self::decode(GRID_ENDPOINT, resp).await?;
    Ok(items.unwrap_or_default().into_iter().map(TripSnapshot::from).collect())
  }

  /// `POST /GlobalBus/Trip/TripsWithNonConformity`
  async fn non_conformities(&self, date: NaiveDate) -> Result<Vec<NonConformity>> {
    let body = NonConformityRequest::for_day(
      date,
      self.config.client_integration_code.clone(),
      self.delay_tolerance,
      self.earliness_tolerance,
    );
    let resp = self.post(NON_CONFORMITY_ENDPOINT).json(&body).send().await?;

    let items: Option<OneOrMany<NonConformityItem>> =
      Self::decode(NON_CONFORMITY_ENDPOINT, resp).await?;
    Ok(
      items
        .map(OneOrMany::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(NonConformity::from)
        .collect(),
    )
  }

  /// `POST /Controlws/HistoryPosition/List`
  async fn positions<'a>(
    &'a self,
    vehicle: &'a str,
    window: UtcWindow,
  ) -> Result<Vec<PositionSample>> {
    let resp = self
      .post(POSITION_ENDPOINT)
      .json(&PositionRequest::new(vehicle, window))
      .send()
      .await?;

    let status = resp.status();
    let body = resp.bytes().await?;
    position_samples(status, &body)
  }
}

/// Interpret a position-history response. `204`, a blank body and `null`
/// all mean no samples; any other non-success status or unparseable body is
/// an error.
fn position_samples(status: StatusCode, body: &[u8]) -> Result<Vec<PositionSample>> {
  if status == StatusCode::NO_CONTENT {
    return Ok(Vec::new());
  }
  if !status.is_success() {
    return Err(Error::Status { endpoint: POSITION_ENDPOINT, status });
  }
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Vec::new());
  }
  let items: Option<Vec<PositionItem>> = serde_json::from_slice(body)
    .map_err(|source| Error::Decode { endpoint: POSITION_ENDPOINT, source })?;
  Ok(items.unwrap_or_default().into_iter().map(PositionSample::from).collect())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn no_content_and_blank_bodies_are_empty() {
    assert!(position_samples(StatusCode::NO_CONTENT, b"").unwrap().is_empty());
    assert!(position_samples(StatusCode::OK, b"").unwrap().is_empty());
    assert!(position_samples(StatusCode::OK, b" \r\n ").unwrap().is_empty());
    assert!(position_samples(StatusCode::OK, b"null").unwrap().is_empty());
    assert!(position_samples(StatusCode::OK, b"[]").unwrap().is_empty());
  }

  #[test]
  fn samples_carry_velocity() {
    let body = br#"[{"Date": "2024-05-10T09:05:00Z", "Velocity": 71.5}, {"Velocity": 30}]"#;
    let samples = position_samples(StatusCode::OK, body).unwrap();
    let velocities: Vec<f64> = samples.iter().map(|s| s.velocity).collect();
    assert_eq!(velocities, vec![71.5, 30.0]);
    assert!(samples[0].recorded_at.is_some());
  }

  #[test]
  fn server_error_is_a_status_error() {
    let err = position_samples(StatusCode::INTERNAL_SERVER_ERROR, b"oops").unwrap_err();
    assert!(matches!(err, Error::Status { status, .. } if status.as_u16() == 500));
  }

  #[test]
  fn garbage_body_is_a_decode_error() {
    let err = position_samples(StatusCode::OK, b"<html>busy</html>").unwrap_err();
    assert!(matches!(err, Error::Decode { endpoint: POSITION_ENDPOINT, .. }));
  }
}
