use sea_orm::sea_query::Expr;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
  entity::{PayoutStatus, ReferralStatus, payout, realtor, referral},
  prelude::*,
};

/// Largest loan amount a referral may carry: $10 billion in cents.
pub const MAX_LOAN_AMOUNT: i64 = 1_000_000_000_000;

fn out_of_range() -> Error {
  Error::invalid("Commission totals are out of range")
}

fn add(a: i64, b: i64) -> Result<i64> {
  a.checked_add(b).ok_or_else(out_of_range)
}

/// Commission owed on `loan_amount` at `rate` percent, truncated to the cent.
pub fn commission_for(loan_amount: i64, rate: i32) -> Result<i64> {
  loan_amount
    .checked_mul(rate as i64)
    .map(|scaled| scaled / 100)
    .ok_or_else(out_of_range)
}

/// What a single referral contributes to its realtor's accrued commission.
/// Funded referrals use the amount frozen when they were funded.
pub fn contribution(referral: &referral::Model, rate: i32) -> Result<i64> {
  let estimate = || commission_for(referral.loan_amount.unwrap_or(0), rate);

  match referral.status {
    ReferralStatus::Funded => match referral.locked_commission {
      Some(locked) => Ok(locked),
      None => estimate(),
    },
    ReferralStatus::Approved => estimate(),
    ReferralStatus::Pending | ReferralStatus::Closed => Ok(0),
  }
}

/// The four running totals cached on a realtor row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Aggregates {
  pub total_loan_amount_referred: i64,
  pub total_commission_earned: i64,
  pub pending_commission: i64,
  pub commission_paid_to_date: i64,
}

impl Aggregates {
  /// Rebuild from source rows. `paid` is the sum of settled payouts.
  ///
  /// Earned is defined as `pending + paid`, so a referral closed after its
  /// commission was paid out cannot drive `pending` negative.
  pub fn derive(
    rate: i32,
    referrals: &[referral::Model],
    paid: i64,
  ) -> Result<Self> {
    let mut loans = 0;
    let mut accrued = 0;

    for referral in referrals {
      if referral.status != ReferralStatus::Closed {
        loans = add(loans, referral.loan_amount.unwrap_or(0))?;
      }
      accrued = add(accrued, contribution(referral, rate)?)?;
    }

    let pending = (accrued - paid).max(0);
    Ok(Self {
      total_loan_amount_referred: loans,
      total_commission_earned: add(pending, paid)?,
      pending_commission: pending,
      commission_paid_to_date: paid,
    })
  }

  pub fn cached(realtor: &realtor::Model) -> Self {
    Self {
      total_loan_amount_referred: realtor.total_loan_amount_referred,
      total_commission_earned: realtor.total_commission_earned,
      pending_commission: realtor.pending_commission,
      commission_paid_to_date: realtor.commission_paid_to_date,
    }
  }

  /// Move `amount` from pending to paid.
  pub fn settle(self, amount: i64) -> Self {
    Self {
      pending_commission: self.pending_commission - amount,
      commission_paid_to_date: self.commission_paid_to_date + amount,
      ..self
    }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusBucket {
  pub count: u64,
  pub amount: i64,
}

impl StatusBucket {
  fn absorb(&mut self, other: StatusBucket) -> Result<()> {
    self.count += other.count;
    self.amount = add(self.amount, other.amount)?;
    Ok(())
  }
}

/// Per-status loan totals of one realtor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Breakdown {
  pub pending: StatusBucket,
  pub approved: StatusBucket,
  pub funded: StatusBucket,
  pub closed: StatusBucket,
}

impl Breakdown {
  pub fn of(referrals: &[referral::Model]) -> Result<Self> {
    let mut breakdown = Self::default();
    for referral in referrals {
      let bucket = match referral.status {
        ReferralStatus::Pending => &mut breakdown.pending,
        ReferralStatus::Approved => &mut breakdown.approved,
        ReferralStatus::Funded => &mut breakdown.funded,
        ReferralStatus::Closed => &mut breakdown.closed,
      };
      bucket.count += 1;
      bucket.amount = add(bucket.amount, referral.loan_amount.unwrap_or(0))?;
    }
    Ok(breakdown)
  }

  pub fn referrals(&self) -> u64 {
    self.pending.count
      + self.approved.count
      + self.funded.count
      + self.closed.count
  }
}

/// Dashboard figures for a single realtor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtorStats {
  pub realtor_id: i32,
  pub total_referrals: u64,
  pub total_clicks: i64,
  pub total_calls_booked: i64,
  pub total_loan_amount_referred: i64,
  pub total_commission_earned: i64,
  pub pending_commission: i64,
  pub commission_paid_to_date: i64,
  pub pending_loan_amount: i64,
  pub approved_loan_amount: i64,
  pub funded_loan_amount: i64,
  #[serde(skip)]
  pub breakdown: Breakdown,
}

impl RealtorStats {
  pub fn new(
    realtor: &realtor::Model,
    referrals: &[referral::Model],
    paid: i64,
  ) -> Result<Self> {
    let aggregates =
      Aggregates::derive(realtor.commission_rate, referrals, paid)?;
    let breakdown = Breakdown::of(referrals)?;

    Ok(Self {
      realtor_id: realtor.id,
      total_referrals: breakdown.referrals(),
      total_clicks: realtor.total_clicks,
      total_calls_booked: realtor.total_calls_booked,
      total_loan_amount_referred: aggregates.total_loan_amount_referred,
      total_commission_earned: aggregates.total_commission_earned,
      pending_commission: aggregates.pending_commission,
      commission_paid_to_date: aggregates.commission_paid_to_date,
      pending_loan_amount: breakdown.pending.amount,
      approved_loan_amount: breakdown.approved.amount,
      funded_loan_amount: breakdown.funded.amount,
      breakdown,
    })
  }
}

/// System-wide figures: the pointwise sum of every realtor's stats.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AdminStats {
  #[serde(rename = "totalAffiliates")]
  pub total_affiliates: u64,
  #[serde(rename = "totalLoans")]
  pub total_loans: u64,
  #[serde(rename = "totalAmount")]
  pub total_amount: i64,
  #[serde(rename = "totalCommissionEarned")]
  pub total_commission_earned: i64,
  #[serde(rename = "pendingCommission")]
  pub pending_commission: i64,
  #[serde(rename = "commissionPaid")]
  pub commission_paid: i64,
  #[serde(rename = "Pending")]
  pub pending: StatusBucket,
  #[serde(rename = "Approved")]
  pub approved: StatusBucket,
  #[serde(rename = "Funded")]
  pub funded: StatusBucket,
  #[serde(rename = "Closed")]
  pub closed: StatusBucket,
}

impl AdminStats {
  pub fn absorb(&mut self, stats: &RealtorStats) -> Result<()> {
    let b = &stats.breakdown;

    self.total_affiliates += 1;
    self.total_loans += b.pending.count + b.approved.count + b.funded.count;
    self.total_amount =
      add(self.total_amount, stats.total_loan_amount_referred)?;
    self.total_commission_earned =
      add(self.total_commission_earned, stats.total_commission_earned)?;
    self.pending_commission =
      add(self.pending_commission, stats.pending_commission)?;
    self.commission_paid =
      add(self.commission_paid, stats.commission_paid_to_date)?;
    self.pending.absorb(b.pending)?;
    self.approved.absorb(b.approved)?;
    self.funded.absorb(b.funded)?;
    self.closed.absorb(b.closed)
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
  pub realtors: u64,
  /// Realtors whose cached totals disagreed with their source rows.
  pub drifted: Vec<i32>,
}

/// Serializes every aggregate writer of the same realtor.
#[derive(Debug, Default)]
pub struct RealtorLocks {
  inner: DashMap<i32, Arc<Mutex<()>>>,
}

impl RealtorLocks {
  pub async fn acquire(&self, realtor_id: i32) -> OwnedMutexGuard<()> {
    let lock = Arc::clone(&self.inner.entry(realtor_id).or_default());
    lock.lock_owned().await
  }

  pub fn forget(&self, realtor_id: i32) {
    self.inner.remove(&realtor_id);
  }
}

pub struct Commission<'a> {
  db: &'a DatabaseConnection,
  locks: &'a RealtorLocks,
}

impl<'a> Commission<'a> {
  pub fn new(db: &'a DatabaseConnection, locks: &'a RealtorLocks) -> Self {
    Self { db, locks }
  }

  pub async fn referrals_of<C: ConnectionTrait>(
    conn: &C,
    realtor_id: i32,
  ) -> Result<Vec<referral::Model>> {
    Ok(
      referral::Entity::find()
        .filter(referral::Column::AffiliateId.eq(realtor_id))
        .order_by_asc(referral::Column::CreatedAt)
        .order_by_asc(referral::Column::Id)
        .all(conn)
        .await?,
    )
  }

  pub async fn paid_to<C: ConnectionTrait>(
    conn: &C,
    realtor_id: i32,
  ) -> Result<i64> {
    let paid = payout::Entity::find()
      .filter(payout::Column::RealtorId.eq(realtor_id))
      .filter(payout::Column::Status.eq(PayoutStatus::Paid))
      .all(conn)
      .await?;
    paid.iter().try_fold(0, |sum, p| add(sum, p.amount))
  }

  pub async fn derive<C: ConnectionTrait>(
    conn: &C,
    realtor: &realtor::Model,
  ) -> Result<Aggregates> {
    let referrals = Self::referrals_of(conn, realtor.id).await?;
    let paid = Self::paid_to(conn, realtor.id).await?;
    Aggregates::derive(realtor.commission_rate, &referrals, paid)
  }

  /// Compare-and-swap the cached totals against the row version read by
  /// the caller.
  pub async fn store<C: ConnectionTrait>(
    conn: &C,
    realtor: realtor::Model,
    aggregates: Aggregates,
  ) -> Result<realtor::Model> {
    let now = Utc::now().naive_utc();

    let result = realtor::Entity::update_many()
      .col_expr(
        realtor::Column::TotalLoanAmountReferred,
        Expr::value(aggregates.total_loan_amount_referred),
      )
      .col_expr(
        realtor::Column::TotalCommissionEarned,
        Expr::value(aggregates.total_commission_earned),
      )
      .col_expr(
        realtor::Column::PendingCommission,
        Expr::value(aggregates.pending_commission),
      )
      .col_expr(
        realtor::Column::CommissionPaidToDate,
        Expr::value(aggregates.commission_paid_to_date),
      )
      .col_expr(realtor::Column::Version, Expr::value(realtor.version + 1))
      .col_expr(realtor::Column::UpdatedAt, Expr::value(now))
      .filter(realtor::Column::Id.eq(realtor.id))
      .filter(realtor::Column::Version.eq(realtor.version))
      .exec(conn)
      .await?;

    if result.rows_affected == 0 {
      return Err(Error::Conflict(format!(
        "realtor {} changed while its totals were being written",
        realtor.id
      )));
    }

    Ok(realtor::Model {
      total_loan_amount_referred: aggregates.total_loan_amount_referred,
      total_commission_earned: aggregates.total_commission_earned,
      pending_commission: aggregates.pending_commission,
      commission_paid_to_date: aggregates.commission_paid_to_date,
      version: realtor.version + 1,
      updated_at: now,
      ..realtor
    })
  }

  /// Re-derive a realtor's cached totals from its referrals and payouts.
  /// Callers hold the realtor's lock.
  pub async fn recompute<C: ConnectionTrait>(
    conn: &C,
    realtor_id: i32,
  ) -> Result<realtor::Model> {
    let realtor = realtor::Entity::find_by_id(realtor_id)
      .one(conn)
      .await?
      .ok_or(Error::RealtorNotFound)?;

    let aggregates = Self::derive(conn, &realtor).await?;
    if aggregates == Aggregates::cached(&realtor) {
      return Ok(realtor);
    }

    Self::store(conn, realtor, aggregates).await
  }

  pub async fn realtor_stats(&self, realtor_id: i32) -> Result<RealtorStats> {
    let txn = self.db.begin().await?;

    let realtor = realtor::Entity::find_by_id(realtor_id)
      .one(&txn)
      .await?
      .ok_or(Error::RealtorNotFound)?;
    let referrals = Self::referrals_of(&txn, realtor_id).await?;
    let paid = Self::paid_to(&txn, realtor_id).await?;

    txn.commit().await?;
    RealtorStats::new(&realtor, &referrals, paid)
  }

  pub async fn admin_stats(&self) -> Result<AdminStats> {
    let txn = self.db.begin().await?;

    let realtors = realtor::Entity::find()
      .order_by_asc(realtor::Column::Id)
      .all(&txn)
      .await?;
    let referrals = referral::Entity::find()
      .order_by_asc(referral::Column::Id)
      .all(&txn)
      .await?;
    let payouts = payout::Entity::find()
      .filter(payout::Column::Status.eq(PayoutStatus::Paid))
      .all(&txn)
      .await?;

    txn.commit().await?;

    let mut by_realtor: HashMap<i32, Vec<referral::Model>> = HashMap::new();
    for referral in referrals {
      by_realtor.entry(referral.affiliate_id).or_default().push(referral);
    }

    let mut paid: HashMap<i32, i64> = HashMap::new();
    for payout in payouts {
      let sum = paid.entry(payout.realtor_id).or_default();
      *sum = add(*sum, payout.amount)?;
    }

    let mut stats = AdminStats::default();
    for realtor in &realtors {
      let referrals = by_realtor.remove(&realtor.id).unwrap_or_default();
      let paid = paid.get(&realtor.id).copied().unwrap_or(0);
      stats.absorb(&RealtorStats::new(realtor, &referrals, paid)?)?;
    }

    Ok(stats)
  }

  /// Full recomputation of every realtor's cached totals.
  pub async fn reconcile(&self) -> Result<Reconciliation> {
    let ids: Vec<i32> = realtor::Entity::find()
      .order_by_asc(realtor::Column::Id)
      .all(self.db)
      .await?
      .into_iter()
      .map(|r| r.id)
      .collect();

    let mut report = Reconciliation::default();

    for id in ids {
      let _guard = self.locks.acquire(id).await;
      let txn = self.db.begin().await?;

      // deleted since the id scan
      let Some(realtor) = realtor::Entity::find_by_id(id).one(&txn).await?
      else {
        continue;
      };

      let aggregates = Self::derive(&txn, &realtor).await?;
      if aggregates != Aggregates::cached(&realtor) {
        warn!(
          "Realtor {} totals drifted: cached {:?}, derived {:?}",
          id,
          Aggregates::cached(&realtor),
          aggregates
        );
        Self::store(&txn, realtor, aggregates).await?;
        report.drifted.push(id);
      }

      txn.commit().await?;
      report.realtors += 1;
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::test_utils::{fixtures, test_db};

  fn referral(status: ReferralStatus, loan: Option<i64>) -> referral::Model {
    let now = Utc::now().naive_utc();
    referral::Model {
      id: 1,
      affiliate_id: 1,
      first_name: "Jane".into(),
      last_name: "Doe".into(),
      email: "jane@example.com".into(),
      phone: None,
      loan_amount: loan,
      status,
      locked_commission: None,
      created_at: now,
      updated_at: now,
    }
  }

  #[test]
  fn test_commission_math() {
    assert_eq!(commission_for(250_000, 10).unwrap(), 25_000);
    assert_eq!(commission_for(999, 10).unwrap(), 99);
    assert_eq!(commission_for(1_000, 0).unwrap(), 0);
    assert_eq!(
      commission_for(MAX_LOAN_AMOUNT, 100).unwrap(),
      MAX_LOAN_AMOUNT
    );
  }

  #[test]
  fn test_oversized_amounts_are_rejected_not_wrapped() {
    assert!(matches!(
      commission_for(i64::MAX / 5, 10),
      Err(Error::InvalidArgs(_))
    ));

    let mut first = referral(ReferralStatus::Funded, Some(1));
    first.locked_commission = Some(i64::MAX / 2 + 1);
    let second = first.clone();

    let result = Aggregates::derive(10, &[first, second], 0);
    assert!(matches!(result, Err(Error::InvalidArgs(_))));

    let huge = referral(ReferralStatus::Pending, Some(i64::MAX));
    assert!(Breakdown::of(&[huge.clone(), huge]).is_err());
  }

  #[test]
  fn test_only_approved_and_funded_accrue() {
    let referrals = vec![
      referral(ReferralStatus::Pending, Some(100_000)),
      referral(ReferralStatus::Approved, Some(200_000)),
      referral(ReferralStatus::Funded, Some(300_000)),
      referral(ReferralStatus::Closed, Some(400_000)),
    ];

    let agg = Aggregates::derive(10, &referrals, 0).unwrap();
    assert_eq!(agg.total_loan_amount_referred, 600_000);
    assert_eq!(agg.pending_commission, 50_000);
    assert_eq!(agg.total_commission_earned, 50_000);
    assert_eq!(agg.commission_paid_to_date, 0);
  }

  #[test]
  fn test_locked_commission_ignores_rate() {
    let mut funded = referral(ReferralStatus::Funded, Some(300_000));
    funded.locked_commission = Some(30_000);

    let agg = Aggregates::derive(50, &[funded], 0).unwrap();
    assert_eq!(agg.pending_commission, 30_000);
  }

  #[test]
  fn test_earned_is_pending_plus_paid_after_clawback() {
    // paid out, then the only accruing referral got closed
    let referrals = vec![referral(ReferralStatus::Closed, Some(100_000))];
    let agg = Aggregates::derive(10, &referrals, 10_000).unwrap();

    assert_eq!(agg.pending_commission, 0);
    assert_eq!(agg.commission_paid_to_date, 10_000);
    assert_eq!(
      agg.total_commission_earned,
      agg.pending_commission + agg.commission_paid_to_date
    );
  }

  #[test]
  fn test_approved_without_amount_accrues_nothing() {
    let agg =
      Aggregates::derive(10, &[referral(ReferralStatus::Approved, None)], 0)
        .unwrap();
    assert_eq!(agg, Aggregates::default());
  }

  #[tokio::test]
  async fn test_stats_are_idempotent() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();

    let realtor = fixtures::realtor(&db, "ann@example.com", 10).await;
    fixtures::referral(&db, &realtor, ReferralStatus::Approved, Some(250_000))
      .await;
    fixtures::referral(&db, &realtor, ReferralStatus::Pending, Some(90_000))
      .await;

    let sv = Commission::new(&db, &locks);
    let first = sv.realtor_stats(realtor.id).await.unwrap();
    let second = sv.realtor_stats(realtor.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total_referrals, 2);
    assert_eq!(first.pending_commission, 25_000);
    assert_eq!(first.pending_loan_amount, 90_000);
    assert_eq!(first.approved_loan_amount, 250_000);
  }

  #[tokio::test]
  async fn test_admin_stats_is_sum_of_realtors() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();

    let ann = fixtures::realtor(&db, "ann@example.com", 10).await;
    let bob = fixtures::realtor(&db, "bob@example.com", 5).await;
    fixtures::referral(&db, &ann, ReferralStatus::Approved, Some(250_000))
      .await;
    fixtures::referral(&db, &ann, ReferralStatus::Closed, Some(70_000)).await;
    fixtures::referral(&db, &bob, ReferralStatus::Funded, Some(100_000)).await;
    fixtures::referral(&db, &bob, ReferralStatus::Pending, None).await;

    let sv = Commission::new(&db, &locks);
    let admin = sv.admin_stats().await.unwrap();
    let ann_stats = sv.realtor_stats(ann.id).await.unwrap();
    let bob_stats = sv.realtor_stats(bob.id).await.unwrap();

    assert_eq!(admin.total_affiliates, 2);
    assert_eq!(admin.total_loans, 3);
    assert_eq!(
      admin.total_amount,
      ann_stats.total_loan_amount_referred
        + bob_stats.total_loan_amount_referred
    );
    assert_eq!(admin.total_amount, 350_000);
    assert_eq!(
      admin.pending_commission,
      ann_stats.pending_commission + bob_stats.pending_commission
    );
    assert_eq!(admin.approved.amount, 250_000);
    assert_eq!(admin.funded.amount, 100_000);
    assert_eq!(admin.pending.count, 1);
    assert_eq!(admin.closed.amount, 70_000);
  }

  #[tokio::test]
  async fn test_reconcile_repairs_drift() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();

    let realtor = fixtures::realtor(&db, "ann@example.com", 10).await;
    fixtures::referral(&db, &realtor, ReferralStatus::Approved, Some(250_000))
      .await;

    let sv = Commission::new(&db, &locks);
    let report = sv.reconcile().await.unwrap();
    assert_eq!(report.realtors, 1);
    assert_eq!(report.drifted, vec![realtor.id]);

    let stored = realtor::Entity::find_by_id(realtor.id)
      .one(&db)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.pending_commission, 25_000);
    assert_eq!(stored.total_loan_amount_referred, 250_000);

    let again = sv.reconcile().await.unwrap();
    assert!(again.drifted.is_empty());
  }

  #[tokio::test]
  async fn test_store_rejects_stale_version() {
    let db = test_db::setup().await;
    let realtor = fixtures::realtor(&db, "ann@example.com", 10).await;

    let fresh = Commission::store(&db, realtor.clone(), Aggregates::default())
      .await
      .unwrap();
    assert_eq!(fresh.version, realtor.version + 1);

    let stale = Commission::store(&db, realtor, Aggregates::default()).await;
    assert!(matches!(stale, Err(Error::Conflict(_))));
  }
}
