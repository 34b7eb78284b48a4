use std::fmt;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::realtor;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
  #[sea_orm(string_value = "pending")]
  #[default]
  Pending,
  #[sea_orm(string_value = "approved")]
  Approved,
  #[sea_orm(string_value = "funded")]
  Funded,
  #[sea_orm(string_value = "closed")]
  Closed,
}

impl ReferralStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Approved => "approved",
      Self::Funded => "funded",
      Self::Closed => "closed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Funded | Self::Closed)
  }

  /// Forward-only lifecycle: `pending -> approved -> funded`, plus
  /// `-> closed` from any non-terminal state. Re-entering `pending` or
  /// `approved` is a loan amount revision.
  pub fn can_become(&self, next: Self) -> bool {
    use ReferralStatus::*;

    if self.is_terminal() {
      return false;
    }
    matches!(
      (self, next),
      (_, Closed) | (Pending, Pending | Approved) | (Approved, Approved | Funded)
    )
  }
}

impl fmt::Display for ReferralStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "referrals")]
#[serde(rename_all = "camelCase")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  #[serde(rename = "affiliate_id")]
  pub affiliate_id: i32,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub phone: Option<String>,
  pub loan_amount: Option<i64>,
  pub status: ReferralStatus,
  /// Commission frozen when the referral was funded.
  pub locked_commission: Option<i64>,
  pub created_at: DateTime,
  pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "realtor::Entity",
    from = "Column::AffiliateId",
    to = "realtor::Column::Id"
  )]
  Realtor,
}

impl Related<realtor::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Realtor.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
