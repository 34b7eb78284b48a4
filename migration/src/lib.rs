pub use sea_orm_migration::prelude::*;

mod m20260201_000001_create_realtors;
mod m20260201_000002_create_referrals;
mod m20260201_000003_create_payouts;
mod m20260215_000004_add_engagement_counters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260201_000001_create_realtors::Migration),
      Box::new(m20260201_000002_create_referrals::Migration),
      Box::new(m20260201_000003_create_payouts::Migration),
      Box::new(m20260215_000004_add_engagement_counters::Migration),
    ]
  }
}
