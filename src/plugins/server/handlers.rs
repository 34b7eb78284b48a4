use std::sync::Arc;

use axum::{
  Json,
  extract::{
    FromRequest, FromRequestParts, State,
    rejection::{JsonRejection, PathRejection, QueryRejection},
  },
  http::{StatusCode, header::AUTHORIZATION, request::Parts},
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
  entity::{PayoutStatus, ReferralStatus, payout, realtor, referral},
  prelude::*,
  state::AppState,
  sv::{
    access::{Caller, Profile},
    commission::{AdminStats, RealtorStats, Reconciliation},
    page::{Page, PageQuery},
    payout::PayoutView,
    realtor::{ProfileEdit, RealtorEdit, Registration},
    referral::{Contact, StatusChange},
  },
};

type App = State<Arc<AppState>>;

#[derive(Serialize)]
pub struct Envelope<T> {
  success: bool,
  #[serde(flatten)]
  body: T,
}

#[derive(Serialize)]
pub struct Data<T> {
  data: T,
}

type Reply<T> = Result<Json<Envelope<Data<T>>>>;
type PageReply<T> = Result<Json<Envelope<Page<T>>>>;

fn ok<T: Serialize>(data: T) -> Json<Envelope<Data<T>>> {
  Json(Envelope { success: true, body: Data { data } })
}

fn page<T: Serialize>(page: Page<T>) -> Json<Envelope<Page<T>>> {
  Json(Envelope { success: true, body: page })
}

#[derive(Serialize)]
struct Failure {
  success: bool,
  code: &'static str,
  msg: String,
}

impl Error {
  fn status(&self) -> StatusCode {
    match self {
      Self::Unauthenticated | Self::TokenExpired => StatusCode::UNAUTHORIZED,
      Self::Forbidden => StatusCode::FORBIDDEN,
      Self::RealtorNotFound
      | Self::ReferralNotFound
      | Self::PayoutNotFound
      | Self::UnknownAffiliate => StatusCode::NOT_FOUND,
      Self::InactiveAffiliate
      | Self::InvalidTransition { .. }
      | Self::InsufficientPendingCommission { .. } => {
        StatusCode::UNPROCESSABLE_ENTITY
      }
      Self::InvalidArgs(_) => StatusCode::BAD_REQUEST,
      Self::Conflict(_) => StatusCode::CONFLICT,
      Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
      Self::PayoutFailed(_) | Self::Db(_) | Self::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    let code = self.code();

    let msg = match &self {
      // storage details stay in the log
      Self::Db(_) | Self::Internal(_) => {
        error!("{}", self);
        "Internal error".to_string()
      }
      _ => self.to_string(),
    };

    let body = Failure { success: false, code, msg };
    (status, Json(body)).into_response()
  }
}

/// JSON body whose rejection is reported in the error envelope.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(Error))]
pub struct Payload<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct Params<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Error))]
pub struct PathArg<T>(pub T);

impl From<JsonRejection> for Error {
  fn from(rejection: JsonRejection) -> Self {
    Self::invalid(rejection.body_text())
  }
}

impl From<QueryRejection> for Error {
  fn from(rejection: QueryRejection) -> Self {
    Self::invalid(rejection.body_text())
  }
}

impl From<PathRejection> for Error {
  fn from(rejection: PathRejection) -> Self {
    Self::invalid(rejection.body_text())
  }
}

/// Bearer credential, resolved but not yet required.
pub struct Access(pub Option<Caller>);

impl FromRequestParts<Arc<AppState>> for Access {
  type Rejection = Error;

  async fn from_request_parts(
    parts: &mut Parts,
    app: &Arc<AppState>,
  ) -> Result<Self> {
    let token = parts
      .headers
      .get(AUTHORIZATION)
      .and_then(|value| value.to_str().ok())
      .and_then(|value| value.strip_prefix("Bearer "));

    Ok(Self(app.authenticate(token).await?))
  }
}

pub async fn health() -> Json<Envelope<Data<&'static str>>> {
  ok(env!("CARGO_PKG_VERSION"))
}

pub async fn register(
  State(app): App,
  Payload(form): Payload<Registration>,
) -> Reply<realtor::Model> {
  Ok(ok(app.gate(None).register(form).await?))
}

#[derive(Deserialize)]
pub struct NewRealtor {
  #[serde(flatten)]
  form: Registration,
  #[serde(alias = "commissionRate")]
  commission_rate: Option<i32>,
  #[serde(alias = "isActive")]
  is_active: Option<bool>,
}

pub async fn create_realtor(
  State(app): App,
  Access(caller): Access,
  Payload(new): Payload<NewRealtor>,
) -> Reply<realtor::Model> {
  let gate = app.gate(caller);
  let realtor =
    gate.create_realtor(new.form, new.commission_rate, new.is_active).await?;
  Ok(ok(realtor))
}

pub async fn list_realtors(
  State(app): App,
  Access(caller): Access,
  Params(query): Params<PageQuery>,
) -> PageReply<realtor::Model> {
  Ok(page(app.gate(caller).list_realtors(&query).await?))
}

pub async fn profile(
  State(app): App,
  Access(caller): Access,
) -> Reply<Profile> {
  Ok(ok(app.gate(caller).profile().await?))
}

pub async fn update_profile(
  State(app): App,
  Access(caller): Access,
  Payload(edit): Payload<ProfileEdit>,
) -> Reply<realtor::Model> {
  Ok(ok(app.gate(caller).update_profile(edit).await?))
}

pub async fn realtor(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<realtor::Model> {
  Ok(ok(app.gate(caller).realtor(id).await?))
}

pub async fn update_realtor(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
  Payload(edit): Payload<RealtorEdit>,
) -> Reply<realtor::Model> {
  Ok(ok(app.gate(caller).update_realtor(id, edit).await?))
}

pub async fn delete_realtor(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<()> {
  Ok(ok(app.gate(caller).delete_realtor(id).await?))
}

pub async fn rotate_link(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<realtor::Model> {
  Ok(ok(app.gate(caller).rotate_link(id).await?))
}

#[derive(Deserialize)]
pub struct Engagement {
  #[serde(alias = "totalClicks")]
  total_clicks: i64,
  #[serde(alias = "totalCallsBooked")]
  total_calls_booked: i64,
}

pub async fn record_engagement(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
  Payload(counters): Payload<Engagement>,
) -> Reply<realtor::Model> {
  let gate = app.gate(caller);
  let realtor = gate
    .record_engagement(id, counters.total_clicks, counters.total_calls_booked)
    .await?;
  Ok(ok(realtor))
}

pub async fn realtor_stats(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<RealtorStats> {
  Ok(ok(app.gate(caller).realtor_stats(id).await?))
}

pub async fn admin_stats(
  State(app): App,
  Access(caller): Access,
) -> Reply<AdminStats> {
  Ok(ok(app.gate(caller).admin_stats().await?))
}

pub async fn reconcile(
  State(app): App,
  Access(caller): Access,
) -> Reply<Reconciliation> {
  Ok(ok(app.gate(caller).reconcile().await?))
}

pub async fn create_referral(
  State(app): App,
  PathArg(link): PathArg<String>,
  Payload(contact): Payload<Contact>,
) -> Reply<referral::Model> {
  Ok(ok(app.gate(None).create_referral(&link, contact).await?))
}

/// Listing parameters. Kept flat: query strings do not survive
/// `#[serde(flatten)]` for numeric fields.
#[derive(Deserialize)]
pub struct ReferralQuery {
  page: Option<u64>,
  limit: Option<u64>,
  #[serde(alias = "search")]
  q: Option<String>,
  status: Option<ReferralStatus>,
  #[serde(alias = "realtorId")]
  realtor_id: Option<i32>,
}

impl ReferralQuery {
  fn split(self) -> (Option<i32>, Option<ReferralStatus>, PageQuery) {
    let query = PageQuery { page: self.page, limit: self.limit, q: self.q };
    (self.realtor_id, self.status, query)
  }
}

pub async fn list_referrals(
  State(app): App,
  Access(caller): Access,
  Params(query): Params<ReferralQuery>,
) -> PageReply<referral::Model> {
  let (realtor_id, status, query) = query.split();
  let referrals =
    app.gate(caller).list_referrals(realtor_id, status, &query).await?;
  Ok(page(referrals))
}

pub async fn realtor_referrals(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
  Params(query): Params<ReferralQuery>,
) -> PageReply<referral::Model> {
  let (_, status, query) = query.split();
  let referrals =
    app.gate(caller).list_referrals(Some(id), status, &query).await?;
  Ok(page(referrals))
}

pub async fn referral(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<referral::Model> {
  Ok(ok(app.gate(caller).referral(id).await?))
}

pub async fn update_referral_status(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
  Payload(change): Payload<StatusChange>,
) -> Reply<referral::Model> {
  Ok(ok(app.gate(caller).update_referral_status(id, change).await?))
}

pub async fn delete_referral(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<()> {
  Ok(ok(app.gate(caller).delete_referral(id).await?))
}

#[derive(Deserialize)]
pub struct PayoutForm {
  #[serde(alias = "realtorId")]
  realtor_id: i32,
  amount: i64,
  note: Option<String>,
}

pub async fn record_payout(
  State(app): App,
  Access(caller): Access,
  Payload(form): Payload<PayoutForm>,
) -> Reply<payout::Model> {
  let gate = app.gate(caller);
  Ok(ok(gate.record_payout(form.realtor_id, form.amount).await?))
}

pub async fn request_payout(
  State(app): App,
  Access(caller): Access,
  Payload(form): Payload<PayoutForm>,
) -> Reply<payout::Model> {
  let gate = app.gate(caller);
  let payout =
    gate.request_payout(form.realtor_id, form.amount, form.note).await?;
  Ok(ok(payout))
}

pub async fn settle_payout(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
) -> Reply<payout::Model> {
  Ok(ok(app.gate(caller).settle_payout(id).await?))
}

#[derive(Deserialize)]
pub struct FailForm {
  #[serde(default)]
  reason: String,
}

pub async fn fail_payout(
  State(app): App,
  Access(caller): Access,
  PathArg(id): PathArg<i32>,
  Payload(form): Payload<FailForm>,
) -> Reply<payout::Model> {
  Ok(ok(app.gate(caller).fail_payout(id, form.reason).await?))
}

#[derive(Deserialize)]
pub struct PayoutQuery {
  page: Option<u64>,
  limit: Option<u64>,
  #[serde(alias = "search")]
  q: Option<String>,
  status: Option<PayoutStatus>,
}

pub async fn list_payouts(
  State(app): App,
  Access(caller): Access,
  Params(query): Params<PayoutQuery>,
) -> PageReply<PayoutView> {
  let status = query.status;
  let query = PageQuery { page: query.page, limit: query.limit, q: query.q };
  Ok(page(app.gate(caller).list_payouts(status, &query).await?))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_mapping() {
    let cases = [
      (Error::Unauthenticated, StatusCode::UNAUTHORIZED),
      (Error::TokenExpired, StatusCode::UNAUTHORIZED),
      (Error::Forbidden, StatusCode::FORBIDDEN),
      (Error::UnknownAffiliate, StatusCode::NOT_FOUND),
      (Error::PayoutNotFound, StatusCode::NOT_FOUND),
      (Error::InactiveAffiliate, StatusCode::UNPROCESSABLE_ENTITY),
      (
        Error::InsufficientPendingCommission { requested: 2, available: 1 },
        StatusCode::UNPROCESSABLE_ENTITY,
      ),
      (Error::invalid("bad"), StatusCode::BAD_REQUEST),
      (Error::Conflict("race".into()), StatusCode::CONFLICT),
      (Error::Timeout("op"), StatusCode::SERVICE_UNAVAILABLE),
      (Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];

    for (err, status) in cases {
      assert_eq!(err.into_response().status(), status);
    }
  }
}
