//! Bearer-token acquisition.

use reqwest::Client;
use serde::Deserialize;

use crate::{Error, Result, UpstreamConfig};

#[derive(Deserialize)]
struct LoginResponse {
  #[serde(rename = "AccessToken")]
  access_token: Option<String>,
}

/// `POST /Login?Username=..&Password=..`, returning the access token.
///
/// Any failure here is fatal to the job that asked for it.
pub async fn authenticate(client: &Client, config: &UpstreamConfig) -> Result<String> {
  let resp = client
    .post(config.url("/Login"))
    .query(&[("Username", &config.username), ("Password", &config.password)])
    .send()
    .await?;

  let status = resp.status();
  if !status.is_success() {
    return Err(Error::Authentication(format!("login returned {status}")));
  }

  let body: LoginResponse = resp.json().await?;
  body
    .access_token
    .filter(|t| !t.is_empty())
    .ok_or_else(|| Error::Authentication("response carried no AccessToken".into()))
}
