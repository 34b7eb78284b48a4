use serde::Serialize;

use crate::{
  entity::{PayoutStatus, payout, realtor},
  prelude::*,
  sv::{
    commission::{Commission, RealtorLocks},
    page::{self, Page, Paging, Searchable},
  },
  utils,
};

/// A payout joined with its realtor's display fields.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutView {
  #[serde(flatten)]
  pub payout: payout::Model,
  pub realtor: String,
  pub email: String,
}

impl Searchable for PayoutView {
  fn search_fields(&self) -> Vec<&str> {
    vec![self.realtor.as_str(), self.email.as_str()]
  }
}

/// Storage failures while settling are reported as a failed payout; the
/// transaction is rolled back so no total moves.
fn settle_failure(err: Error) -> Error {
  match err {
    Error::Db(err) => Error::PayoutFailed(err.to_string()),
    other => other,
  }
}

pub struct Payout<'a> {
  db: &'a DatabaseConnection,
  locks: &'a RealtorLocks,
}

impl<'a> Payout<'a> {
  pub fn new(db: &'a DatabaseConnection, locks: &'a RealtorLocks) -> Self {
    Self { db, locks }
  }

  /// Create a payout and settle it in one step.
  pub async fn record(
    &self,
    realtor_id: i32,
    amount: i64,
  ) -> Result<payout::Model> {
    if amount <= 0 {
      return Err(Error::invalid("Payout amount must be positive"));
    }

    let _guard = self.locks.acquire(realtor_id).await;
    let txn = self.db.begin().await?;

    let realtor = realtor::Entity::find_by_id(realtor_id)
      .one(&txn)
      .await?
      .ok_or(Error::RealtorNotFound)?;

    let payout = payout::ActiveModel {
      id: NotSet,
      realtor_id: Set(realtor_id),
      amount: Set(amount),
      status: Set(PayoutStatus::Pending),
      note: Set(None),
      created_at: Set(utils::now()),
      settled_at: Set(None),
    }
    .insert(&txn)
    .await
    .map_err(|err| Error::PayoutFailed(err.to_string()))?;

    let payout =
      Self::settle_in(&txn, realtor, payout).await.map_err(settle_failure)?;
    txn.commit().await.map_err(|err| Error::PayoutFailed(err.to_string()))?;

    info!(
      "Payout {} of {} settled for realtor {}",
      payout.id,
      utils::format_usd(amount),
      realtor_id
    );
    Ok(payout)
  }

  /// Check against freshly derived pending commission, then move the amount
  /// to paid and mark the payout settled. Runs inside the caller's
  /// transaction under the realtor's lock.
  async fn settle_in<C: ConnectionTrait>(
    conn: &C,
    realtor: realtor::Model,
    payout: payout::Model,
  ) -> Result<payout::Model> {
    let current = Commission::derive(conn, &realtor).await?;

    if payout.amount > current.pending_commission {
      warn!(
        "Payout of {} for realtor {} exceeds pending {}",
        payout.amount, realtor.id, current.pending_commission
      );
      return Err(Error::InsufficientPendingCommission {
        requested: payout.amount,
        available: current.pending_commission,
      });
    }

    Commission::store(conn, realtor, current.settle(payout.amount)).await?;

    Ok(
      payout::ActiveModel {
        status: Set(PayoutStatus::Paid),
        settled_at: Set(Some(utils::now())),
        ..payout.into()
      }
      .update(conn)
      .await?,
    )
  }

  /// Queue a payout for later settlement. Totals are untouched until it is
  /// settled.
  pub async fn request(
    &self,
    realtor_id: i32,
    amount: i64,
    note: Option<String>,
  ) -> Result<payout::Model> {
    if amount <= 0 {
      return Err(Error::invalid("Payout amount must be positive"));
    }

    let realtor = realtor::Entity::find_by_id(realtor_id)
      .one(self.db)
      .await?
      .ok_or(Error::RealtorNotFound)?;

    let available = Commission::derive(self.db, &realtor).await?;
    if amount > available.pending_commission {
      return Err(Error::InsufficientPendingCommission {
        requested: amount,
        available: available.pending_commission,
      });
    }

    let payout = payout::ActiveModel {
      id: NotSet,
      realtor_id: Set(realtor_id),
      amount: Set(amount),
      status: Set(PayoutStatus::Pending),
      note: Set(note.filter(|n| !n.trim().is_empty())),
      created_at: Set(utils::now()),
      settled_at: Set(None),
    }
    .insert(self.db)
    .await?;

    info!("Payout {} requested for realtor {}", payout.id, realtor_id);
    Ok(payout)
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<payout::Model>> {
    Ok(payout::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn get(&self, id: i32) -> Result<payout::Model> {
    self.by_id(id).await?.ok_or(Error::PayoutNotFound)
  }

  /// `Pending -> Paid`, with the same atomic check as [`Payout::record`].
  pub async fn settle(&self, id: i32) -> Result<payout::Model> {
    let realtor_id = self.get(id).await?.realtor_id;
    let _guard = self.locks.acquire(realtor_id).await;
    let txn = self.db.begin().await?;

    let payout = payout::Entity::find_by_id(id)
      .one(&txn)
      .await?
      .ok_or(Error::PayoutNotFound)?;
    if payout.status != PayoutStatus::Pending {
      return Err(Error::Conflict(format!(
        "Payout {} is already {}",
        id, payout.status
      )));
    }

    let realtor = realtor::Entity::find_by_id(realtor_id)
      .one(&txn)
      .await?
      .ok_or(Error::RealtorNotFound)?;

    let payout =
      Self::settle_in(&txn, realtor, payout).await.map_err(settle_failure)?;
    txn.commit().await.map_err(|err| Error::PayoutFailed(err.to_string()))?;

    info!("Payout {} settled for realtor {}", id, realtor_id);
    Ok(payout)
  }

  /// `Pending -> Failed`. Totals are untouched. Serialized with
  /// [`Payout::settle`] so a payout is never both paid and failed.
  pub async fn fail(&self, id: i32, reason: String) -> Result<payout::Model> {
    let realtor_id = self.get(id).await?.realtor_id;
    let _guard = self.locks.acquire(realtor_id).await;
    let txn = self.db.begin().await?;

    let payout = payout::Entity::find_by_id(id)
      .one(&txn)
      .await?
      .ok_or(Error::PayoutNotFound)?;
    if payout.status != PayoutStatus::Pending {
      return Err(Error::Conflict(format!(
        "Payout {} is already {}",
        id, payout.status
      )));
    }

    let reason = reason.trim().to_string();
    let payout = payout::ActiveModel {
      status: Set(PayoutStatus::Failed),
      note: Set((!reason.is_empty()).then_some(reason)),
      settled_at: Set(Some(utils::now())),
      ..payout.into()
    }
    .update(&txn)
    .await?;
    txn.commit().await?;

    warn!("Payout {} marked failed", id);
    Ok(payout)
  }

  pub async fn list(
    &self,
    realtor_id: Option<i32>,
    status: Option<PayoutStatus>,
    search: Option<&str>,
    paging: Paging,
  ) -> Result<Page<PayoutView>> {
    let mut query = payout::Entity::find();

    if let Some(realtor_id) = realtor_id {
      query = query.filter(payout::Column::RealtorId.eq(realtor_id));
    }
    if let Some(status) = status {
      query = query.filter(payout::Column::Status.eq(status));
    }

    let rows = query
      .order_by_asc(payout::Column::CreatedAt)
      .order_by_asc(payout::Column::Id)
      .find_also_related(realtor::Entity)
      .all(self.db)
      .await?;

    let views = rows
      .into_iter()
      .map(|(payout, realtor)| PayoutView {
        payout,
        realtor: realtor.as_ref().map(|r| r.full_name()).unwrap_or_default(),
        email: realtor.map(|r| r.email).unwrap_or_default(),
      })
      .collect();

    Ok(page::filter_page(views, search, paging))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    entity::ReferralStatus,
    sv::{
      referral::{Referral, StatusChange},
      test_utils::{fixtures, test_db},
    },
  };

  async fn stored(db: &DatabaseConnection, id: i32) -> realtor::Model {
    realtor::Entity::find_by_id(id).one(db).await.unwrap().unwrap()
  }

  /// Realtor at 10% with one approved 1_000 loan: 100 pending.
  async fn with_pending_100(db: &DatabaseConnection) -> realtor::Model {
    let realtor = fixtures::realtor(db, "ann@example.com", 10).await;
    fixtures::referral(db, &realtor, ReferralStatus::Approved, Some(1_000))
      .await;
    realtor
  }

  #[tokio::test]
  async fn test_full_commission_scenario() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = fixtures::realtor(&db, "ann@example.com", 10).await;
    let ledger = Referral::new(&db, &locks);

    let referral =
      fixtures::referral(&db, &realtor, ReferralStatus::Pending, None).await;
    ledger
      .update_status(
        referral.id,
        StatusChange {
          status: ReferralStatus::Approved,
          loan_amount: Some(250_000),
        },
      )
      .await
      .unwrap();
    assert_eq!(stored(&db, realtor.id).await.pending_commission, 25_000);

    ledger
      .update_status(
        referral.id,
        StatusChange { status: ReferralStatus::Funded, loan_amount: None },
      )
      .await
      .unwrap();
    assert_eq!(stored(&db, realtor.id).await.pending_commission, 25_000);

    let payout =
      Payout::new(&db, &locks).record(realtor.id, 25_000).await.unwrap();
    assert_eq!(payout.status, PayoutStatus::Paid);
    assert!(payout.settled_at.is_some());

    let after = stored(&db, realtor.id).await;
    assert_eq!(after.pending_commission, 0);
    assert_eq!(after.commission_paid_to_date, 25_000);
    assert_eq!(after.total_commission_earned, 25_000);

    // source-of-truth recomputation agrees with the settled cache
    let report = Commission::new(&db, &locks).reconcile().await.unwrap();
    assert!(report.drifted.is_empty());
  }

  #[tokio::test]
  async fn test_overdraw_rejected_and_totals_unchanged() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;
    let before = stored(&db, realtor.id).await;

    let result = Payout::new(&db, &locks).record(realtor.id, 101).await;
    assert!(matches!(
      result,
      Err(Error::InsufficientPendingCommission { requested: 101, available: 100 })
    ));

    assert_eq!(stored(&db, realtor.id).await, before);
    let payouts = payout::Entity::find().all(&db).await.unwrap();
    assert!(payouts.is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_payouts_cannot_overdraw() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;
    let sv = Payout::new(&db, &locks);

    let (a, b) =
      tokio::join!(sv.record(realtor.id, 60), sv.record(realtor.id, 60));

    let ok = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    let rejected = if a.is_err() { a } else { b };
    assert!(matches!(
      rejected,
      Err(Error::InsufficientPendingCommission { requested: 60, available: 40 })
    ));

    let after = stored(&db, realtor.id).await;
    assert_eq!(after.pending_commission, 40);
    assert_eq!(after.commission_paid_to_date, 60);
    assert_eq!(
      after.total_commission_earned,
      after.pending_commission + after.commission_paid_to_date
    );
  }

  #[tokio::test]
  async fn test_request_then_settle() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;
    let sv = Payout::new(&db, &locks);

    let requested = sv
      .request(realtor.id, 70, Some("March payout".into()))
      .await
      .unwrap();
    assert_eq!(requested.status, PayoutStatus::Pending);
    assert_eq!(stored(&db, realtor.id).await.commission_paid_to_date, 0);

    let settled = sv.settle(requested.id).await.unwrap();
    assert_eq!(settled.status, PayoutStatus::Paid);
    assert_eq!(stored(&db, realtor.id).await.pending_commission, 30);

    assert!(matches!(sv.settle(requested.id).await, Err(Error::Conflict(_))));
    assert!(matches!(
      sv.fail(requested.id, "late".into()).await,
      Err(Error::Conflict(_))
    ));
  }

  #[tokio::test]
  async fn test_settle_rechecks_pending() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;
    let sv = Payout::new(&db, &locks);

    let first = sv.request(realtor.id, 80, None).await.unwrap();
    let second = sv.request(realtor.id, 80, None).await.unwrap();

    sv.settle(first.id).await.unwrap();
    let result = sv.settle(second.id).await;
    assert!(matches!(
      result,
      Err(Error::InsufficientPendingCommission { requested: 80, available: 20 })
    ));
    assert_eq!(sv.get(second.id).await.unwrap().status, PayoutStatus::Pending);
  }

  #[tokio::test]
  async fn test_fail_leaves_totals() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;
    let sv = Payout::new(&db, &locks);

    let payout = sv.request(realtor.id, 50, None).await.unwrap();
    let failed = sv.fail(payout.id, "bank rejected".into()).await.unwrap();

    assert_eq!(failed.status, PayoutStatus::Failed);
    assert_eq!(failed.note.as_deref(), Some("bank rejected"));
    assert_eq!(stored(&db, realtor.id).await.commission_paid_to_date, 0);
  }

  #[tokio::test]
  async fn test_fail_and_settle_race_has_one_winner() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;
    let sv = Payout::new(&db, &locks);

    let commission = Commission::new(&db, &locks);
    commission.reconcile().await.unwrap();

    let payout = sv.request(realtor.id, 60, None).await.unwrap();
    let (failed, settled) =
      tokio::join!(sv.fail(payout.id, "voided".into()), sv.settle(payout.id));

    assert!(failed.is_ok() != settled.is_ok());
    let loser = if failed.is_err() { failed } else { settled };
    assert!(matches!(loser, Err(Error::Conflict(_))));

    let after = stored(&db, realtor.id).await;
    match sv.get(payout.id).await.unwrap().status {
      PayoutStatus::Paid => assert_eq!(after.commission_paid_to_date, 60),
      PayoutStatus::Failed => assert_eq!(after.commission_paid_to_date, 0),
      PayoutStatus::Pending => panic!("payout left pending"),
    }

    let report = commission.reconcile().await.unwrap();
    assert!(report.drifted.is_empty());
  }

  #[tokio::test]
  async fn test_list_filters_and_searches() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let ann = with_pending_100(&db).await;
    let bob = fixtures::realtor(&db, "bob@example.com", 10).await;
    fixtures::referral(&db, &bob, ReferralStatus::Approved, Some(1_000)).await;
    let sv = Payout::new(&db, &locks);

    sv.record(ann.id, 10).await.unwrap();
    sv.request(ann.id, 10, None).await.unwrap();
    sv.record(bob.id, 10).await.unwrap();

    let paid = sv
      .list(None, Some(PayoutStatus::Paid), None, Paging::new(1, 10))
      .await
      .unwrap();
    assert_eq!(paid.total, 2);

    let bobs =
      sv.list(None, None, Some("BOB@"), Paging::new(1, 10)).await.unwrap();
    assert_eq!(bobs.total, 1);
    assert_eq!(bobs.data[0].payout.realtor_id, bob.id);

    let own =
      sv.list(Some(ann.id), None, None, Paging::new(1, 10)).await.unwrap();
    assert_eq!(own.total, 2);
  }

  #[tokio::test]
  async fn test_rejects_non_positive_amount() {
    let db = test_db::setup().await;
    let locks = RealtorLocks::default();
    let realtor = with_pending_100(&db).await;

    let result = Payout::new(&db, &locks).record(realtor.id, 0).await;
    assert!(matches!(result, Err(Error::InvalidArgs(_))));
  }
}
