use sea_orm_migration::prelude::*;

use super::m20260201_000001_create_realtors::Realtors;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    // Counters are fed by the external click/calendar tracker
    manager
      .alter_table(
        Table::alter()
          .table(Realtors::Table)
          .add_column(
            ColumnDef::new(RealtorsExt::TotalClicks)
              .big_integer()
              .not_null()
              .default(0),
          )
          .to_owned(),
      )
      .await?;

    manager
      .alter_table(
        Table::alter()
          .table(Realtors::Table)
          .add_column(
            ColumnDef::new(RealtorsExt::TotalCallsBooked)
              .big_integer()
              .not_null()
              .default(0),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .alter_table(
        Table::alter()
          .table(Realtors::Table)
          .drop_column(RealtorsExt::TotalCallsBooked)
          .to_owned(),
      )
      .await?;

    manager
      .alter_table(
        Table::alter()
          .table(Realtors::Table)
          .drop_column(RealtorsExt::TotalClicks)
          .to_owned(),
      )
      .await
  }
}

#[derive(DeriveIden)]
enum RealtorsExt {
  TotalClicks,
  TotalCallsBooked,
}
