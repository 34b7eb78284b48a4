//! Caller resolution and the role gate every entry point goes through.
//!
//! Admins pass through unchanged. Realtors are confined to their own
//! records, and a foreign id is refused with `Forbidden` before anything
//! is looked up, so the answer never reveals whether the record exists.

use std::future::Future;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
  entity::{PayoutStatus, ReferralStatus, payout, realtor, referral},
  prelude::*,
  state::{Config, Services},
  sv::{
    commission::{AdminStats, RealtorStats, Reconciliation},
    page::{Page, PageQuery},
    payout::PayoutView,
    realtor::{ProfileEdit, RealtorEdit, Registration},
    referral::{Contact, Scope, StatusChange},
  },
  utils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Admin,
  Realtor,
}

/// A resolved caller. For `Role::Realtor`, `id` is the realtor's own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
  pub id: i32,
  pub role: Role,
}

impl Caller {
  pub fn is_admin(&self) -> bool {
    self.role == Role::Admin
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
  pub sub: i32,
  pub role: Role,
  /// Unix seconds.
  pub exp: i64,
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
  async fn resolve(&self, token: &str) -> Result<Caller>;
}

type HmacSha256 = Hmac<Sha256>;

/// `base64url(claims) "." hex(hmac_sha256(secret, payload))`
pub struct SignedTokens {
  key: Vec<u8>,
}

impl SignedTokens {
  pub fn new(secret: impl AsRef<[u8]>) -> Self {
    Self { key: secret.as_ref().to_vec() }
  }

  fn mac(&self, payload: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(&self.key)
      .map_err(|err| Error::Internal(err.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(mac)
  }

  pub fn sign(&self, claims: &Claims) -> Result<String> {
    let body =
      json::to_vec(claims).map_err(|err| Error::Internal(err.to_string()))?;
    let payload = URL_SAFE_NO_PAD.encode(body);
    let signature = self.mac(&payload)?.finalize().into_bytes();

    Ok(format!("{payload}.{}", hex::encode(signature)))
  }

  pub fn verify(&self, token: &str, now: i64) -> Result<Claims> {
    let (payload, signature) =
      token.split_once('.').ok_or(Error::Unauthenticated)?;
    let signature =
      hex::decode(signature).map_err(|_| Error::Unauthenticated)?;

    self
      .mac(payload)?
      .verify_slice(&signature)
      .map_err(|_| Error::Unauthenticated)?;

    let claims: Claims = URL_SAFE_NO_PAD
      .decode(payload)
      .ok()
      .and_then(|body| json::from_slice(&body).ok())
      .ok_or(Error::Unauthenticated)?;

    if claims.exp <= now {
      return Err(Error::TokenExpired);
    }
    Ok(claims)
  }
}

#[async_trait]
impl CredentialResolver for SignedTokens {
  async fn resolve(&self, token: &str) -> Result<Caller> {
    let claims = self.verify(token.trim(), Utc::now().timestamp())?;
    Ok(Caller { id: claims.sub, role: claims.role })
  }
}

/// What a realtor sees on their own dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
  #[serde(flatten)]
  pub realtor: realtor::Model,
  pub stats: RealtorStats,
  pub affiliate_url: String,
}

pub struct Gate<'a> {
  sv: Services<'a>,
  config: &'a Config,
  caller: Option<Caller>,
}

impl<'a> Gate<'a> {
  pub fn new(
    sv: Services<'a>,
    config: &'a Config,
    caller: Option<Caller>,
  ) -> Self {
    Self { sv, config, caller }
  }

  fn caller(&self) -> Result<Caller> {
    self.caller.ok_or(Error::Unauthenticated)
  }

  fn admin(&self) -> Result<Caller> {
    let caller = self.caller()?;
    if !caller.is_admin() {
      warn!("Realtor {} attempted an admin operation", caller.id);
      return Err(Error::Forbidden);
    }
    Ok(caller)
  }

  fn owner_or_admin(&self, realtor_id: i32) -> Result<Caller> {
    let caller = self.caller()?;
    if !caller.is_admin() && caller.id != realtor_id {
      warn!("Realtor {} denied access to realtor {}", caller.id, realtor_id);
      return Err(Error::Forbidden);
    }
    Ok(caller)
  }

  /// Profile operations act on the caller's own row; admins have none.
  fn realtor_self(&self) -> Result<Caller> {
    let caller = self.caller()?;
    if caller.is_admin() {
      warn!("Admin {} attempted a realtor profile operation", caller.id);
      return Err(Error::Forbidden);
    }
    Ok(caller)
  }

  /// Runs `fut` under the configured operation timeout. Dropping the future
  /// on expiry rolls back any transaction it had open.
  async fn bounded<T>(
    &self,
    op: &'static str,
    fut: impl Future<Output = Result<T>>,
  ) -> Result<T> {
    tokio::time::timeout(self.config.op_timeout, fut).await.map_err(|_| {
      warn!("`{}` exceeded {:?}", op, self.config.op_timeout);
      Error::Timeout(op)
    })?
  }

  pub async fn register(&self, form: Registration) -> Result<realtor::Model> {
    let rate = self.config.default_commission_rate;
    self.bounded("register", self.sv.realtor.register(form, rate)).await
  }

  pub async fn create_realtor(
    &self,
    form: Registration,
    commission_rate: Option<i32>,
    is_active: Option<bool>,
  ) -> Result<realtor::Model> {
    self.admin()?;
    let rate = commission_rate.unwrap_or(self.config.default_commission_rate);
    self
      .bounded(
        "create_realtor",
        self.sv.realtor.create(form, rate, is_active.unwrap_or(true)),
      )
      .await
  }

  pub async fn realtor(&self, id: i32) -> Result<realtor::Model> {
    self.owner_or_admin(id)?;
    self.bounded("get_realtor", self.sv.realtor.get(id)).await
  }

  pub async fn profile(&self) -> Result<Profile> {
    let caller = self.realtor_self()?;
    self
      .bounded("profile", async {
        let realtor = self.sv.realtor.get(caller.id).await?;
        let stats = self.sv.commission.realtor_stats(caller.id).await?;
        let affiliate_url = utils::affiliate_url(
          &self.config.base_url,
          &realtor.unique_affiliate_link,
        );
        Ok(Profile { realtor, stats, affiliate_url })
      })
      .await
  }

  pub async fn update_profile(
    &self,
    edit: ProfileEdit,
  ) -> Result<realtor::Model> {
    let caller = self.realtor_self()?;
    let update = self.sv.realtor.update_profile(caller.id, edit);
    self.bounded("update_profile", update).await
  }

  pub async fn update_realtor(
    &self,
    id: i32,
    edit: RealtorEdit,
  ) -> Result<realtor::Model> {
    self.admin()?;
    self.bounded("update_realtor", self.sv.realtor.update(id, edit)).await
  }

  pub async fn rotate_link(&self, id: i32) -> Result<realtor::Model> {
    self.admin()?;
    self.bounded("rotate_link", self.sv.realtor.rotate_link(id)).await
  }

  pub async fn record_engagement(
    &self,
    id: i32,
    total_clicks: i64,
    total_calls_booked: i64,
  ) -> Result<realtor::Model> {
    self.admin()?;
    let record =
      self.sv.realtor.record_engagement(id, total_clicks, total_calls_booked);
    self.bounded("record_engagement", record).await
  }

  pub async fn list_realtors(
    &self,
    query: &PageQuery,
  ) -> Result<Page<realtor::Model>> {
    self.admin()?;
    let paging =
      query.paging(self.config.page_size, self.config.max_page_size)?;
    self
      .bounded("list_realtors", self.sv.realtor.list(query.search(), paging))
      .await
  }

  pub async fn delete_realtor(&self, id: i32) -> Result<()> {
    self.admin()?;
    self.bounded("delete_realtor", self.sv.realtor.delete(id)).await
  }

  pub async fn realtor_stats(&self, id: i32) -> Result<RealtorStats> {
    self.owner_or_admin(id)?;
    self.bounded("realtor_stats", self.sv.commission.realtor_stats(id)).await
  }

  pub async fn admin_stats(&self) -> Result<AdminStats> {
    self.admin()?;
    self.bounded("admin_stats", self.sv.commission.admin_stats()).await
  }

  pub async fn reconcile(&self) -> Result<Reconciliation> {
    self.admin()?;
    self.bounded("reconcile", self.sv.commission.reconcile()).await
  }

  /// Public: the affiliate link itself authorizes the signup.
  pub async fn create_referral(
    &self,
    link: &str,
    contact: Contact,
  ) -> Result<referral::Model> {
    let create = self.sv.referral.create(link, contact);
    self.bounded("create_referral", create).await
  }

  pub async fn referral(&self, id: i32) -> Result<referral::Model> {
    let caller = self.caller()?;
    self
      .bounded("get_referral", async {
        let found = self.sv.referral.by_id(id).await?;
        match found {
          Some(referral)
            if caller.is_admin() || referral.affiliate_id == caller.id =>
          {
            Ok(referral)
          }
          // a realtor cannot tell a foreign id from a missing one
          _ if !caller.is_admin() => Err(Error::Forbidden),
          _ => Err(Error::ReferralNotFound),
        }
      })
      .await
  }

  /// Realtors always list their own referrals; asking for another
  /// realtor's is refused. Admins list everything or one realtor.
  pub async fn list_referrals(
    &self,
    realtor_id: Option<i32>,
    status: Option<ReferralStatus>,
    query: &PageQuery,
  ) -> Result<Page<referral::Model>> {
    let caller = self.caller()?;
    let scope = match (caller.role, realtor_id) {
      (Role::Admin, None) => Scope::All,
      (Role::Admin, Some(id)) => Scope::Realtor(id),
      (Role::Realtor, Some(id)) => {
        self.owner_or_admin(id)?;
        Scope::Realtor(id)
      }
      (Role::Realtor, None) => Scope::Realtor(caller.id),
    };
    let paging =
      query.paging(self.config.page_size, self.config.max_page_size)?;

    self
      .bounded(
        "list_referrals",
        self.sv.referral.list(scope, status, query.search(), paging),
      )
      .await
  }

  pub async fn update_referral_status(
    &self,
    id: i32,
    change: StatusChange,
  ) -> Result<referral::Model> {
    self.admin()?;
    let update = self.sv.referral.update_status(id, change);
    self.bounded("update_referral_status", update).await
  }

  pub async fn delete_referral(&self, id: i32) -> Result<()> {
    self.admin()?;
    self.bounded("delete_referral", self.sv.referral.delete(id)).await
  }

  pub async fn record_payout(
    &self,
    realtor_id: i32,
    amount: i64,
  ) -> Result<payout::Model> {
    self.admin()?;
    self
      .bounded("record_payout", self.sv.payout.record(realtor_id, amount))
      .await
  }

  pub async fn request_payout(
    &self,
    realtor_id: i32,
    amount: i64,
    note: Option<String>,
  ) -> Result<payout::Model> {
    self.admin()?;
    self
      .bounded(
        "request_payout",
        self.sv.payout.request(realtor_id, amount, note),
      )
      .await
  }

  pub async fn settle_payout(&self, id: i32) -> Result<payout::Model> {
    self.admin()?;
    self.bounded("settle_payout", self.sv.payout.settle(id)).await
  }

  pub async fn fail_payout(
    &self,
    id: i32,
    reason: String,
  ) -> Result<payout::Model> {
    self.admin()?;
    self.bounded("fail_payout", self.sv.payout.fail(id, reason)).await
  }

  pub async fn list_payouts(
    &self,
    status: Option<PayoutStatus>,
    query: &PageQuery,
  ) -> Result<Page<PayoutView>> {
    let caller = self.caller()?;
    let realtor_id = (!caller.is_admin()).then_some(caller.id);
    let paging =
      query.paging(self.config.page_size, self.config.max_page_size)?;

    self
      .bounded(
        "list_payouts",
        self.sv.payout.list(realtor_id, status, query.search(), paging),
      )
      .await
  }
}
