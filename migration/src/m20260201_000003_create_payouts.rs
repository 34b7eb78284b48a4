use sea_orm_migration::prelude::*;

use super::m20260201_000001_create_realtors::Realtors;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Payouts::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Payouts::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Payouts::RealtorId).integer().not_null())
          .col(ColumnDef::new(Payouts::Amount).big_integer().not_null())
          .col(
            ColumnDef::new(Payouts::Status)
              .string()
              .not_null()
              .default("pending"),
          )
          .col(ColumnDef::new(Payouts::Note).string().null())
          .col(ColumnDef::new(Payouts::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Payouts::SettledAt).date_time().null())
          // realtors with payout history cannot be deleted
          .foreign_key(
            ForeignKey::create()
              .name("fk_payouts_realtor")
              .from(Payouts::Table, Payouts::RealtorId)
              .to(Realtors::Table, Realtors::Id)
              .on_delete(ForeignKeyAction::Restrict),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_payouts_realtor")
          .table(Payouts::Table)
          .col(Payouts::RealtorId)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Payouts::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Payouts {
  Table,
  Id,
  RealtorId,
  Amount,
  Status,
  Note,
  CreatedAt,
  SettledAt,
}
