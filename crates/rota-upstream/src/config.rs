use std::time::Duration;

use rota_core::violation::PlaybackRewrite;
use serde::Deserialize;

/// Connection settings for the upstream service, read from the `[upstream]`
/// config table.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
  #[serde(default = "default_base_url")]
  pub base_url:                String,
  pub username:                String,
  pub password:                String,
  #[serde(default = "default_client_integration_code")]
  pub client_integration_code: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:            u64,
  /// Host fragment replaced in playback links.
  #[serde(default = "default_playback_host")]
  pub playback_host:           String,
  #[serde(default = "default_playback_replacement")]
  pub playback_replacement:    String,
}

fn default_base_url() -> String { "https://integration.systemsatx.com.br".into() }

fn default_client_integration_code() -> String { "1003".into() }

fn default_timeout_secs() -> u64 { 30 }

fn default_playback_host() -> String { "bus.systemsatx.com.br".into() }

fn default_playback_replacement() -> String {
  "http://educacaorumocerto.trackland.com.br/".into()
}

impl UpstreamConfig {
  pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }

  pub fn playback_rewrite(&self) -> PlaybackRewrite {
    PlaybackRewrite {
      host:        self.playback_host.clone(),
      replacement: self.playback_replacement.clone(),
    }
  }

  pub(crate) fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url.trim_end_matches('/'), path)
  }
}
