use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{payout, referral};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "realtors")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub first_name: String,
  pub last_name: String,
  #[sea_orm(unique)]
  pub email: String,
  pub phone: Option<String>,
  pub address: Option<String>,
  pub notes: Option<String>,
  pub calendar_name: Option<String>,
  pub niche: Option<String>,
  pub about: Option<String>,
  /// Whole percent, `0..=100`.
  pub commission_rate: i32,
  #[sea_orm(unique)]
  pub unique_affiliate_link: String,
  pub is_active: bool,
  pub total_clicks: i64,
  pub total_calls_booked: i64,
  pub total_loan_amount_referred: i64,
  pub total_commission_earned: i64,
  pub pending_commission: i64,
  pub commission_paid_to_date: i64,
  #[serde(skip)]
  pub version: i64,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

impl Model {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "referral::Entity")]
  Referrals,
  #[sea_orm(has_many = "payout::Entity")]
  Payouts,
}

impl Related<referral::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Referrals.def()
  }
}

impl Related<payout::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Payouts.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
