use std::fmt;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::realtor;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
  #[sea_orm(string_value = "pending")]
  #[default]
  Pending,
  #[sea_orm(string_value = "paid")]
  Paid,
  #[sea_orm(string_value = "failed")]
  Failed,
}

impl fmt::Display for PayoutStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Pending => "pending",
      Self::Paid => "paid",
      Self::Failed => "failed",
    })
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payouts")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub realtor_id: i32,
  pub amount: i64,
  pub status: PayoutStatus,
  pub note: Option<String>,
  pub created_at: DateTime,
  pub settled_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "realtor::Entity",
    from = "Column::RealtorId",
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
