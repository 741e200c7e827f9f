//! Runtime configuration: a TOML file layered under `ROTA_*` environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono_tz::Tz;
use rota_core::{policy::Policy, time::parse_timezone};
use rota_upstream::UpstreamConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  #[serde(default = "default_database_path")]
  pub database_path: PathBuf,
  /// IANA zone that defines "today" and the meaning of naive timestamps.
  #[serde(default = "default_timezone")]
  pub timezone:      String,
  /// Only the job commands need credentials; `migrate` and `routes` do not.
  #[serde(default)]
  pub upstream:      Option<UpstreamConfig>,
  #[serde(default)]
  pub policy:        Policy,
  #[serde(default)]
  pub schedule:      Schedule,
}

fn default_database_path() -> PathBuf { PathBuf::from("rota.db") }

fn default_timezone() -> String { "America/Sao_Paulo".into() }

/// Daemon intervals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Schedule {
  pub grid_minutes:       u64,
  pub violations_minutes: u64,
  pub view_minutes:       u64,
  /// Local hour (0-23) of the daily reconciliation.
  pub reconcile_hour:     u32,
}

impl Default for Schedule {
  fn default() -> Self {
    Self {
      grid_minutes:       10,
      violations_minutes: 10,
      view_minutes:       60,
      reconcile_hour:     19,
    }
  }
}

impl AppConfig {
  /// Read `path` (optional) and the environment, then validate.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(environment())
      .build()
      .context("failed to read config file")?;

    Self::from_settings(settings)
  }

  pub fn from_settings(settings: config::Config) -> anyhow::Result<Self> {
    let mut cfg: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise configuration")?;
    cfg.database_path = expand_tilde(&cfg.database_path);
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> anyhow::Result<()> {
    self.tz()?;
    self.policy.validate().context("invalid [policy]")?;

    let s = &self.schedule;
    anyhow::ensure!(s.reconcile_hour < 24, "schedule.reconcile_hour must be 0-23");
    for (name, minutes) in [
      ("grid_minutes", s.grid_minutes),
      ("violations_minutes", s.violations_minutes),
      ("view_minutes", s.view_minutes),
    ] {
      anyhow::ensure!(minutes > 0, "schedule.{name} must be positive");
    }
    Ok(())
  }

  pub fn tz(&self) -> anyhow::Result<Tz> {
    parse_timezone(&self.timezone).context("invalid `timezone`")
  }

  pub fn upstream(&self) -> anyhow::Result<&UpstreamConfig> {
    self
      .upstream
      .as_ref()
      .context("missing [upstream] section (username and password are required)")
  }
}

/// `ROTA_UPSTREAM__PASSWORD` → `upstream.password`. Values stay strings until
/// deserialisation, so credentials with leading zeros survive.
fn environment() -> config::Environment {
  config::Environment::with_prefix("ROTA").prefix_separator("_").separator("__")
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use config::{Config, File, FileFormat};

  use super::*;

  fn parse(toml: &str) -> anyhow::Result<AppConfig> {
    let settings = Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()?;
    AppConfig::from_settings(settings)
  }

  #[test]
  fn empty_file_yields_defaults() {
    let cfg = parse("").unwrap();
    assert_eq!(cfg.database_path, PathBuf::from("rota.db"));
    assert_eq!(cfg.tz().unwrap(), chrono_tz::America::Sao_Paulo);
    assert_eq!(cfg.policy, Policy::default());
    assert_eq!(cfg.schedule, Schedule::default());
    assert!(cfg.upstream().is_err());
  }

  #[test]
  fn upstream_section_fills_defaults_around_credentials() {
    let cfg = parse(
      r#"
        database_path = "/var/lib/rota/rota.db"

        [upstream]
        username = "svc"
        password = "secret"

        [policy]
        speed_limit = 60.0
        merge_window_days = 3

        [schedule]
        reconcile_hour = 5
      "#,
    )
    .unwrap();

    let upstream = cfg.upstream().unwrap();
    assert_eq!(upstream.username, "svc");
    assert_eq!(upstream.client_integration_code, "1003");
    assert_eq!(upstream.base_url, "https://integration.systemsatx.com.br");
    assert_eq!(cfg.policy.speed_limit, 60.0);
    assert_eq!(cfg.policy.merge_window_days, 3);
    assert_eq!(cfg.policy.reconcile_window_days, 10);
    assert_eq!(cfg.schedule.reconcile_hour, 5);
    assert_eq!(cfg.schedule.grid_minutes, 10);
  }

  #[test]
  fn env_values_keep_their_text() {
    let vars = [
      ("ROTA_UPSTREAM__USERNAME", "0042"),
      ("ROTA_UPSTREAM__PASSWORD", "007123"),
      ("ROTA_POLICY__MERGE_WINDOW_DAYS", "4"),
      ("ROTA_SCHEDULE__RECONCILE_HOUR", "6"),
    ];
    let env = environment().source(Some(
      vars.into_iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect(),
    ));
    let settings = Config::builder().add_source(env).build().unwrap();
    let cfg = AppConfig::from_settings(settings).unwrap();

    let upstream = cfg.upstream().unwrap();
    assert_eq!(upstream.username, "0042");
    assert_eq!(upstream.password, "007123");
    assert_eq!(cfg.policy.merge_window_days, 4);
    assert_eq!(cfg.schedule.reconcile_hour, 6);
  }

  #[test]
  fn rejects_unknown_timezone() {
    let err = parse(r#"timezone = "Mars/Olympus""#).unwrap_err();
    assert!(format!("{err:#}").contains("Mars/Olympus"));
  }

  #[test]
  fn rejects_out_of_range_schedule() {
    assert!(parse("[schedule]\nreconcile_hour = 24").is_err());
    assert!(parse("[schedule]\nview_minutes = 0").is_err());
  }

  #[test]
  fn rejects_zero_batch_size() {
    assert!(parse("[policy]\nclassifier_batch_size = 0").is_err());
  }
}
