use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Realtors::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Realtors::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Realtors::FirstName).string().not_null())
          .col(ColumnDef::new(Realtors::LastName).string().not_null())
          .col(ColumnDef::new(Realtors::Email).string().not_null().unique_key())
          .col(ColumnDef::new(Realtors::Phone).string().null())
          .col(ColumnDef::new(Realtors::Address).string().null())
          .col(ColumnDef::new(Realtors::Notes).string().null())
          .col(ColumnDef::new(Realtors::CalendarName).string().null())
          .col(ColumnDef::new(Realtors::Niche).string().null())
          .col(ColumnDef::new(Realtors::About).string().null())
          .col(
            ColumnDef::new(Realtors::CommissionRate)
              .integer()
              .not_null()
              .default(10),
          )
          .col(
            ColumnDef::new(Realtors::UniqueAffiliateLink)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(
            ColumnDef::new(Realtors::IsActive)
              .boolean()
              .not_null()
              .default(true),
          )
          .col(
            ColumnDef::new(Realtors::TotalLoanAmountReferred)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Realtors::TotalCommissionEarned)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Realtors::PendingCommission)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Realtors::CommissionPaidToDate)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Realtors::Version)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Realtors::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Realtors::UpdatedAt).date_time().not_null())
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Realtors::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Realtors {
  Table,
  Id,
  FirstName,
  LastName,
  Email,
  Phone,
  Address,
  Notes,
  CalendarName,
  Niche,
  About,
  CommissionRate,
  UniqueAffiliateLink,
  IsActive,
  TotalLoanAmountReferred,
  TotalCommissionEarned,
  PendingCommission,
  CommissionPaidToDate,
  Version,
  CreatedAt,
  UpdatedAt,
}
