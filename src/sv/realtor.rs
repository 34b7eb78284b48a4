use sea_orm::{DbErr, SqlErr};
use serde::Deserialize;

use crate::{
  entity::{payout, realtor, referral},
  prelude::*,
  sv::{
    commission::{Commission, RealtorLocks},
    page::{self, Page, Paging, Searchable},
  },
  utils,
};

/// Self-service signup form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
  #[serde(alias = "firstName")]
  pub first_name: String,
  #[serde(alias = "lastName")]
  pub last_name: String,
  pub email: String,
  pub phone: Option<String>,
  pub address: Option<String>,
  #[serde(alias = "calendarName")]
  pub calendar_name: Option<String>,
  pub niche: Option<String>,
  pub about: Option<String>,
}

/// Contact fields a realtor may change on their own profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileEdit {
  #[serde(alias = "firstName")]
  pub first_name: Option<String>,
  #[serde(alias = "lastName")]
  pub last_name: Option<String>,
  pub phone: Option<String>,
  pub address: Option<String>,
  #[serde(alias = "calendarName")]
  pub calendar_name: Option<String>,
  pub niche: Option<String>,
  pub about: Option<String>,
}

/// Administrative edit, a superset of [`ProfileEdit`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtorEdit {
  #[serde(flatten)]
  pub profile: ProfileEdit,
  pub email: Option<String>,
  pub notes: Option<String>,
  pub commission_rate: Option<i32>,
  pub is_active: Option<bool>,
}

impl Searchable for realtor::Model {
  fn search_fields(&self) -> Vec<&str> {
    vec![
      self.first_name.as_str(),
      self.last_name.as_str(),
      self.email.as_str(),
    ]
  }
}

fn required(field: &str, value: &str) -> Result<String> {
  let value = value.trim();
  if value.is_empty() {
    return Err(Error::invalid(format!("`{field}` must not be empty")));
  }
  Ok(value.to_string())
}

/// Blank optional text clears the field.
fn optional(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn email(value: &str) -> Result<String> {
  let value = value.trim().to_lowercase();
  match value.split_once('@') {
    Some((user, domain))
      if !user.is_empty() && domain.contains('.') && !domain.starts_with('.') =>
    {
      Ok(value)
    }
    _ => Err(Error::invalid(format!("Invalid email `{value}`"))),
  }
}

fn commission_rate(rate: i32) -> Result<i32> {
  if !(0..=100).contains(&rate) {
    return Err(Error::invalid("Commission rate must be within 0..=100"));
  }
  Ok(rate)
}

/// The unique index settles registrations that race past
/// `ensure_email_free`.
fn email_taken(err: DbErr) -> Error {
  match err.sql_err() {
    Some(SqlErr::UniqueConstraintViolation(_)) => {
      Error::Conflict("Email is already registered".into())
    }
    _ => err.into(),
  }
}

pub struct Realtor<'a> {
  db: &'a DatabaseConnection,
  locks: &'a RealtorLocks,
}

impl<'a> Realtor<'a> {
  pub fn new(db: &'a DatabaseConnection, locks: &'a RealtorLocks) -> Self {
    Self { db, locks }
  }

  /// Self-service registration at the default commission rate.
  pub async fn register(
    &self,
    form: Registration,
    default_rate: i32,
  ) -> Result<realtor::Model> {
    self.create(form, default_rate, true).await
  }

  pub async fn create(
    &self,
    form: Registration,
    rate: i32,
    is_active: bool,
  ) -> Result<realtor::Model> {
    let first_name = required("first_name", &form.first_name)?;
    let last_name = required("last_name", &form.last_name)?;
    let email = email(&form.email)?;
    let rate = commission_rate(rate)?;

    self.ensure_email_free(&email, None).await?;

    let now = utils::now();
    let realtor = realtor::ActiveModel {
      id: NotSet,
      first_name: Set(first_name),
      last_name: Set(last_name),
      email: Set(email),
      phone: Set(optional(form.phone)),
      address: Set(optional(form.address)),
      notes: Set(None),
      calendar_name: Set(optional(form.calendar_name)),
      niche: Set(optional(form.niche)),
      about: Set(optional(form.about)),
      commission_rate: Set(rate),
      unique_affiliate_link: Set(utils::new_link()),
      is_active: Set(is_active),
      total_clicks: Set(0),
      total_calls_booked: Set(0),
      total_loan_amount_referred: Set(0),
      total_commission_earned: Set(0),
      pending_commission: Set(0),
      commission_paid_to_date: Set(0),
      version: Set(0),
      created_at: Set(now),
      updated_at: Set(now),
    }
    .insert(self.db)
    .await
    .map_err(email_taken)?;

    info!("Realtor {} registered ({})", realtor.id, realtor.email);
    Ok(realtor)
  }

  async fn ensure_email_free(
    &self,
    email: &str,
    owner: Option<i32>,
  ) -> Result<()> {
    let existing = realtor::Entity::find()
      .filter(realtor::Column::Email.eq(email))
      .one(self.db)
      .await?;

    match existing {
      Some(other) if Some(other.id) != owner => {
        Err(Error::Conflict(format!("Email `{email}` is already registered")))
      }
      _ => Ok(()),
    }
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<realtor::Model>> {
    Ok(realtor::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn get(&self, id: i32) -> Result<realtor::Model> {
    self.by_id(id).await?.ok_or(Error::RealtorNotFound)
  }

  /// Resolve an affiliate link token to its realtor.
  pub async fn by_link(&self, link: &str) -> Result<realtor::Model> {
    realtor::Entity::find()
      .filter(realtor::Column::UniqueAffiliateLink.eq(link.trim()))
      .one(self.db)
      .await?
      .ok_or(Error::UnknownAffiliate)
  }

  pub async fn update_profile(
    &self,
    id: i32,
    edit: ProfileEdit,
  ) -> Result<realtor::Model> {
    let realtor = self.get(id).await?;
    let mut active: realtor::ActiveModel = realtor.into();

    apply_profile(&mut active, edit)?;
    active.updated_at = Set(utils::now());

    Ok(active.update(self.db).await?)
  }

  /// Administrative edit. A commission rate change re-derives the realtor's
  /// totals in the same transaction; funded commissions stay locked.
  pub async fn update(
    &self,
    id: i32,
    edit: RealtorEdit,
  ) -> Result<realtor::Model> {
    let email = edit.email.as_deref().map(email).transpose()?;
    let rate = edit.commission_rate.map(commission_rate).transpose()?;
    if let Some(email) = &email {
      self.ensure_email_free(email, Some(id)).await?;
    }

    let _guard = self.locks.acquire(id).await;
    let txn = self.db.begin().await?;

    let realtor = realtor::Entity::find_by_id(id)
      .one(&txn)
      .await?
      .ok_or(Error::RealtorNotFound)?;
    let rate_changed = rate.is_some_and(|rate| rate != realtor.commission_rate);

    let mut active: realtor::ActiveModel = realtor.into();
    apply_profile(&mut active, edit.profile)?;

    if let Some(email) = email {
      active.email = Set(email);
    }
    if let Some(notes) = edit.notes {
      active.notes = Set(optional(Some(notes)));
    }
    if let Some(rate) = rate {
      active.commission_rate = Set(rate);
    }
    if let Some(is_active) = edit.is_active {
      active.is_active = Set(is_active);
    }
    active.updated_at = Set(utils::now());

    let mut realtor = active.update(&txn).await.map_err(email_taken)?;
    if rate_changed {
      realtor = Commission::recompute(&txn, id).await?;
      info!(
        "Realtor {} commission rate set to {}%",
        id, realtor.commission_rate
      );
    }

    txn.commit().await?;
    Ok(realtor)
  }

  /// Issue a fresh affiliate link; the previous one stops resolving.
  pub async fn rotate_link(&self, id: i32) -> Result<realtor::Model> {
    let realtor = self.get(id).await?;

    let realtor = realtor::ActiveModel {
      unique_affiliate_link: Set(utils::new_link()),
      updated_at: Set(utils::now()),
      ..realtor.into()
    }
    .update(self.db)
    .await?;

    info!("Realtor {} affiliate link rotated", id);
    Ok(realtor)
  }

  /// Store counters tracked by the external click/calendar tracker.
  pub async fn record_engagement(
    &self,
    id: i32,
    total_clicks: i64,
    total_calls_booked: i64,
  ) -> Result<realtor::Model> {
    if total_clicks < 0 || total_calls_booked < 0 {
      return Err(Error::invalid("Engagement counters must not be negative"));
    }

    let realtor = self.get(id).await?;

    Ok(
      realtor::ActiveModel {
        total_clicks: Set(total_clicks),
        total_calls_booked: Set(total_calls_booked),
        updated_at: Set(utils::now()),
        ..realtor.into()
      }
      .update(self.db)
      .await?,
    )
  }

  /// Hard delete. Refused while the realtor owns referrals or payout
  /// history; deactivate such realtors instead.
  pub async fn delete(&self, id: i32) -> Result<()> {
    let _guard = self.locks.acquire(id).await;
    let txn = self.db.begin().await?;

    realtor::Entity::find_by_id(id)
      .one(&txn)
      .await?
      .ok_or(Error::RealtorNotFound)?;

    let referrals = referral::Entity::find()
      .filter(referral::Column::AffiliateId.eq(id))
      .count(&txn)
      .await?;
    let payouts = payout::Entity::find()
      .filter(payout::Column::RealtorId.eq(id))
      .count(&txn)
      .await?;

    if referrals > 0 || payouts > 0 {
      warn!(
        "Refusing to delete realtor {}: {} referrals, {} payouts",
        id, referrals, payouts
      );
      return Err(Error::Conflict(format!(
        "Realtor has {referrals} referrals and {payouts} payouts; deactivate instead"
      )));
    }

    realtor::Entity::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    drop(_guard);
    self.locks.forget(id);

    info!("Realtor {} deleted", id);
    Ok(())
  }

  pub async fn all(&self) -> Result<Vec<realtor::Model>> {
    Ok(
      realtor::Entity::find()
        .order_by_asc(realtor::Column::CreatedAt)
        .order_by_asc(realtor::Column::Id)
        .all(self.db)
        .await?,
    )
  }

  pub async fn list(
    &self,
    search: Option<&str>,
    paging: Paging,
  ) -> Result<Page<realtor::Model>> {
    Ok(page::filter_page(self.all().await?, search, paging))
  }
}

fn apply_profile(
  active: &mut realtor::ActiveModel,
  edit: ProfileEdit,
) -> Result<()> {
  if let Some(first_name) = edit.first_name {
    active.first_name = Set(required("first_name", &first_name)?);
  }
  if let Some(last_name) = edit.last_name {
    active.last_name = Set(required("last_name", &last_name)?);
  }
  if let Some(phone) = edit.phone {
    active.phone = Set(optional(Some(phone)));
  }
  if let Some(address) = edit.address {
    active.address = Set(optional(Some(address)));
  }
  if let Some(calendar_name) = edit.calendar_name {
    active.calendar_name = Set(optional(Some(calendar_name)));
  }
  if let Some(niche) = edit.niche {
    active.niche = Set(optional(Some(niche)));
  }
  if let Some(about) = edit.about {
    active.about = Set(optional(Some(about)));
  }
  Ok(())
}
