use std::{env, str::FromStr};

use anyhow::Context;
use migration::{Migrator, MigratorTrait};

use crate::{
  prelude::*,
  sv::{
    self,
    access::{Caller, CredentialResolver, Gate, SignedTokens},
    commission::RealtorLocks,
  },
};

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  /// HMAC key shared with the service that issues credentials.
  pub server_secret: String,
  pub port: u16,
  /// Public origin used to render affiliate URLs.
  pub base_url: String,
  pub page_size: u64,
  pub max_page_size: u64,
  pub default_commission_rate: i32,
  pub op_timeout: Duration,
  /// `0s` disables the periodic reconciliation.
  pub reconcile_interval: Duration,
  pub rate_limit_per_second: u64,
  pub rate_limit_burst: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      database_url: "sqlite:affiliate.db?mode=rwc".into(),
      server_secret: String::new(),
      port: 3000,
      base_url: "http://localhost:3000".into(),
      page_size: 10,
      max_page_size: 100,
      default_commission_rate: 10,
      op_timeout: Duration::from_secs(5),
      reconcile_interval: Duration::from_secs(3600),
      rate_limit_per_second: 2,
      rate_limit_burst: 100,
    }
  }
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(name) {
    Ok(raw) => raw.trim().parse().with_context(|| format!("Invalid {name}")),
    Err(_) => Ok(default),
  }
}

fn duration(name: &str, default: Duration) -> anyhow::Result<Duration> {
  match env::var(name) {
    Ok(raw) => humantime::parse_duration(raw.trim())
      .with_context(|| format!("Invalid {name}, expected e.g. `5s` or `1h`")),
    Err(_) => Ok(default),
  }
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    let defaults = Self::default();

    let server_secret =
      env::var("SERVER_SECRET").context("SERVER_SECRET not set")?;
    if server_secret.trim().is_empty() {
      anyhow::bail!("SERVER_SECRET must not be empty");
    }

    let config = Self {
      database_url: env::var("DATABASE_URL")
        .unwrap_or(defaults.database_url),
      server_secret,
      port: parsed("PORT", defaults.port)?,
      base_url: env::var("BASE_URL").unwrap_or(defaults.base_url),
      page_size: parsed("PAGE_SIZE", defaults.page_size)?,
      max_page_size: parsed("MAX_PAGE_SIZE", defaults.max_page_size)?,
      default_commission_rate: parsed(
        "DEFAULT_COMMISSION_RATE",
        defaults.default_commission_rate,
      )?,
      op_timeout: duration("OP_TIMEOUT", defaults.op_timeout)?,
      reconcile_interval: duration(
        "RECONCILE_INTERVAL",
        defaults.reconcile_interval,
      )?,
      rate_limit_per_second: parsed(
        "RATE_LIMIT_PER_SECOND",
        defaults.rate_limit_per_second,
      )?,
      rate_limit_burst: parsed("RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
    };

    if config.page_size == 0 || config.page_size > config.max_page_size {
      anyhow::bail!("PAGE_SIZE must be within 1..=MAX_PAGE_SIZE");
    }
    if !(0..=100).contains(&config.default_commission_rate) {
      anyhow::bail!("DEFAULT_COMMISSION_RATE must be within 0..=100");
    }

    Ok(config)
  }
}

pub struct Services<'a> {
  pub realtor: sv::Realtor<'a>,
  pub referral: sv::Referral<'a>,
  pub commission: sv::Commission<'a>,
  pub payout: sv::Payout<'a>,
}

impl<'a> Services<'a> {
  pub fn new(db: &'a DatabaseConnection, locks: &'a RealtorLocks) -> Self {
    Self {
      realtor: sv::Realtor::new(db, locks),
      referral: sv::Referral::new(db, locks),
      commission: sv::Commission::new(db, locks),
      payout: sv::Payout::new(db, locks),
    }
  }
}

pub struct AppState {
  pub db: DatabaseConnection,
  pub config: Config,
  pub locks: RealtorLocks,
  pub tokens: SignedTokens,
}

impl AppState {
  pub async fn new(config: Config) -> anyhow::Result<Self> {
    let url = &config.database_url;
    let db = Database::connect(url)
      .await
      .with_context(|| format!("Failed to connect to {url}"))?;

    Migrator::up(&db, None).await.context("Failed to run migrations")?;

    Ok(Self {
      db,
      tokens: SignedTokens::new(&config.server_secret),
      locks: RealtorLocks::default(),
      config,
    })
  }

  pub fn sv(&self) -> Services<'_> {
    Services::new(&self.db, &self.locks)
  }

  /// Resolve an optional bearer credential. A missing credential is not an
  /// error here; the gate rejects it on the first operation that needs one.
  pub async fn authenticate(
    &self,
    token: Option<&str>,
  ) -> Result<Option<Caller>> {
    let Some(token) = token else {
      return Ok(None);
    };

    tokio::time::timeout(self.config.op_timeout, self.tokens.resolve(token))
      .await
      .map_err(|_| Error::Timeout("authenticate"))?
      .map(Some)
  }

  pub fn gate(&self, caller: Option<Caller>) -> Gate<'_> {
    Gate::new(self.sv(), &self.config, caller)
  }
}
