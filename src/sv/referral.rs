use serde::Deserialize;

use crate::{
  entity::{ReferralStatus, realtor, referral},
  prelude::*,
  sv::{
    self,
    commission::{
      Commission, MAX_LOAN_AMOUNT, RealtorLocks, commission_for,
    },
    page::{self, Page, Paging, Searchable},
    realtor::email,
  },
  utils,
};

/// Contact details a prospective client leaves on the signup page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contact {
  #[serde(alias = "firstName")]
  pub first_name: String,
  #[serde(alias = "lastName")]
  pub last_name: String,
  pub email: String,
  pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatusChange {
  pub status: ReferralStatus,
  #[serde(alias = "loanAmount")]
  pub loan_amount: Option<i64>,
}

/// Which realtors' referrals a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  All,
  Realtor(i32),
}

impl Searchable for referral::Model {
  fn search_fields(&self) -> Vec<&str> {
    let mut fields = vec![
      self.first_name.as_str(),
      self.last_name.as_str(),
      self.email.as_str(),
    ];
    if let Some(phone) = &self.phone {
      fields.push(phone);
    }
    fields
  }
}

pub struct Referral<'a> {
  db: &'a DatabaseConnection,
  locks: &'a RealtorLocks,
}

impl<'a> Referral<'a> {
  pub fn new(db: &'a DatabaseConnection, locks: &'a RealtorLocks) -> Self {
    Self { db, locks }
  }

  /// Record a signup that arrived through an affiliate link. The owning
  /// realtor is fixed here for the referral's whole life.
  pub async fn create(
    &self,
    link: &str,
    contact: Contact,
  ) -> Result<referral::Model> {
    let realtor = sv::Realtor::new(self.db, self.locks).by_link(link).await?;

    if !realtor.is_active {
      warn!("Signup through inactive realtor {} rejected", realtor.id);
      return Err(Error::InactiveAffiliate);
    }

    let first_name = contact.first_name.trim().to_string();
    let last_name = contact.last_name.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
      return Err(Error::invalid("First and last name are required"));
    }
    let email = email(&contact.email)?;
    let phone =
      contact.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

    let now = utils::now();
    let referral = referral::ActiveModel {
      id: NotSet,
      affiliate_id: Set(realtor.id),
      first_name: Set(first_name),
      last_name: Set(last_name),
      email: Set(email),
      phone: Set(phone),
      loan_amount: Set(None),
      status: Set(ReferralStatus::Pending),
      locked_commission: Set(None),
      created_at: Set(now),
      updated_at: Set(now),
    }
    .insert(self.db)
    .await?;

    info!("Referral {} created for realtor {}", referral.id, realtor.id);
    Ok(referral)
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<referral::Model>> {
    Ok(referral::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn get(&self, id: i32) -> Result<referral::Model> {
    self.by_id(id).await?.ok_or(Error::ReferralNotFound)
  }

  /// Advance a referral along its lifecycle and re-derive the owner's
  /// totals in the same transaction. Status and loan amount are written
  /// together.
  pub async fn update_status(
    &self,
    id: i32,
    change: StatusChange,
  ) -> Result<referral::Model> {
    if change.loan_amount.is_some_and(|amount| amount < 0) {
      return Err(Error::invalid("Loan amount must not be negative"));
    }
    if change.loan_amount.is_some_and(|amount| amount > MAX_LOAN_AMOUNT) {
      return Err(Error::invalid(format!(
        "Loan amount must not exceed {}",
        utils::format_usd(MAX_LOAN_AMOUNT)
      )));
    }

    let owner = self.get(id).await?.affiliate_id;
    let _guard = self.locks.acquire(owner).await;
    let txn = self.db.begin().await?;

    let referral = referral::Entity::find_by_id(id)
      .one(&txn)
      .await?
      .ok_or(Error::ReferralNotFound)?;

    let from = referral.status;
    if !from.can_become(change.status) {
      warn!("Referral {} rejected transition {} -> {}", id, from, change.status);
      return Err(Error::InvalidTransition { from, to: change.status });
    }

    let loan_amount = change.loan_amount.or(referral.loan_amount);
    let locked_commission = match change.status {
      ReferralStatus::Funded => {
        let amount = loan_amount.ok_or_else(|| {
          Error::invalid("A funded referral needs a loan amount")
        })?;
        let realtor = realtor::Entity::find_by_id(owner)
          .one(&txn)
          .await?
          .ok_or(Error::RealtorNotFound)?;
        Some(commission_for(amount, realtor.commission_rate)?)
      }
      _ => None,
    };

    let referral = referral::ActiveModel {
      status: Set(change.status),
      loan_amount: Set(loan_amount),
      locked_commission: Set(locked_commission),
      updated_at: Set(utils::now()),
      ..referral.into()
    }
    .update(&txn)
    .await?;

    let realtor = Commission::recompute(&txn, owner).await?;
    txn.commit().await?;

    info!(
      "Referral {} {} -> {} (realtor {} pending {})",
      id,
      from,
      referral.status,
      owner,
      utils::format_usd(realtor.pending_commission)
    );
    Ok(referral)
  }

  /// Deterministic listing: creation order, filtered before paging.
  pub async fn list(
    &self,
    scope: Scope,
    status: Option<ReferralStatus>,
    search: Option<&str>,
    paging: Paging,
  ) -> Result<Page<referral::Model>> {
    let mut query = referral::Entity::find();

    if let Scope::Realtor(realtor_id) = scope {
      query = query.filter(referral::Column::AffiliateId.eq(realtor_id));
    }
    if let Some(status) = status {
      query = query.filter(referral::Column::Status.eq(status));
    }

    let referrals = query
      .order_by_asc(referral::Column::CreatedAt)
      .order_by_asc(referral::Column::Id)
      .all(self.db)
      .await?;

    Ok(page::filter_page(referrals, search, paging))
  }

  pub async fn delete(&self, id: i32) -> Result<()> {
    let owner = self.get(id).await?.affiliate_id;
    let _guard = self.locks.acquire(owner).await;
    let txn = self.db.begin().await?;

    let result = referral::Entity::delete_by_id(id).exec(&txn).await?;
    if result.rows_affected == 0 {
      return Err(Error::ReferralNotFound);
    }

    Commission::recompute(&txn, owner).await?;
    txn.commit().await?;

    info!("Referral {} of realtor {} deleted", id, owner);
    Ok(())
  }
}
