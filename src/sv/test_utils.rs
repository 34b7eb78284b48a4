//! Shared test utilities for database setup

#[cfg(test)]
pub mod test_db {
  use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema,
  };

  use crate::entity::*;

  /// Creates an in-memory SQLite database with all required tables
  pub async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(DbBackend::Sqlite);

    // Realtors first, referrals and payouts reference them
    let stmt = schema.create_table_from_entity(realtor::Entity);
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();

    let stmt = schema.create_table_from_entity(referral::Entity);
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();

    let stmt = schema.create_table_from_entity(payout::Entity);
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();

    db
  }
}

#[cfg(test)]
pub mod fixtures {
  use crate::{
    entity::{ReferralStatus, realtor, referral},
    prelude::*,
    sv::commission::commission_for,
    utils,
  };

  /// Inserts an active realtor with zeroed totals.
  pub async fn realtor(
    db: &DatabaseConnection,
    email: &str,
    commission_rate: i32,
  ) -> realtor::Model {
    let now = utils::now();
    realtor::ActiveModel {
      id: NotSet,
      first_name: Set("Test".into()),
      last_name: Set(email.split('@').next().unwrap_or("Realtor").into()),
      email: Set(email.into()),
      phone: Set(Some("555-0100".into())),
      address: Set(None),
      notes: Set(None),
      calendar_name: Set(None),
      niche: Set(None),
      about: Set(None),
      commission_rate: Set(commission_rate),
      unique_affiliate_link: Set(utils::new_link()),
      is_active: Set(true),
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
    .insert(db)
    .await
    .unwrap()
  }

  /// Inserts a referral row directly, bypassing the ledger and without
  /// touching the owner's cached totals.
  pub async fn referral(
    db: &DatabaseConnection,
    owner: &realtor::Model,
    status: ReferralStatus,
    loan_amount: Option<i64>,
  ) -> referral::Model {
    let now = utils::now();
    let locked = (status == ReferralStatus::Funded).then(|| {
      commission_for(loan_amount.unwrap_or(0), owner.commission_rate)
        .unwrap()
    });

    referral::ActiveModel {
      id: NotSet,
      affiliate_id: Set(owner.id),
      first_name: Set("Client".into()),
      last_name: Set(format!("Of{}", owner.id)),
      email: Set(format!("client{}@example.com", owner.id)),
      phone: Set(None),
      loan_amount: Set(loan_amount),
      status: Set(status),
      locked_commission: Set(locked),
      created_at: Set(now),
      updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
  }
}
