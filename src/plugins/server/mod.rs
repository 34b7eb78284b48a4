mod handlers;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
  Router,
  routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};

use crate::{prelude::*, state::AppState};

pub struct Plugin;

fn routes() -> Router<Arc<AppState>> {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/auth/register", post(handlers::register))
    .route("/auth/update-profile", put(handlers::update_profile))
    .route(
      "/realtors",
      get(handlers::list_realtors).post(handlers::create_realtor),
    )
    .route("/realtors/me", get(handlers::profile))
    .route(
      "/realtors/{id}",
      get(handlers::realtor)
        .put(handlers::update_realtor)
        .delete(handlers::delete_realtor),
    )
    .route("/realtors/{id}/link", post(handlers::rotate_link))
    .route("/realtors/{id}/engagement", put(handlers::record_engagement))
    .route("/realtors/{id}/stats", get(handlers::realtor_stats))
    .route("/signup/{link}", post(handlers::create_referral))
    .route("/referrals", get(handlers::list_referrals))
    .route("/referrals/by-admin", get(handlers::list_referrals))
    .route("/referrals/realtor/{id}", get(handlers::realtor_referrals))
    .route(
      "/referrals/{id}",
      get(handlers::referral).delete(handlers::delete_referral),
    )
    .route("/referrals/{id}/status", put(handlers::update_referral_status))
    .route("/get-admin-stats", get(handlers::admin_stats))
    .route("/admin/reconcile", post(handlers::reconcile))
    .route(
      "/payouts",
      get(handlers::list_payouts).post(handlers::record_payout),
    )
    .route("/payouts/request", post(handlers::request_payout))
    .route("/payouts/{id}/settle", post(handlers::settle_payout))
    .route("/payouts/{id}/fail", post(handlers::fail_payout))
}

#[async_trait]
impl super::Plugin for Plugin {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let governor_conf = Arc::new(
      GovernorConfigBuilder::default()
        .per_second(app.config.rate_limit_per_second)
        .burst_size(app.config.rate_limit_burst)
        .finish()
        .context("Failed to build rate limiter config")?,
    );

    let governor_limiter = governor_conf.limiter().clone();

    tokio::spawn(async move {
      loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        governor_limiter.retain_recent();
      }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], app.config.port));

    let router = routes()
      .layer(
        ServiceBuilder::new()
          .layer(TraceLayer::new_for_http())
          .layer(GovernorLayer::new(governor_conf))
          .layer(
            CorsLayer::new()
              .allow_origin(Any)
              .allow_methods(Any)
              .allow_headers(Any),
          ),
      )
      .with_state(app)
      .into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(addr)
      .await
      .with_context(|| format!("Failed to bind {addr}"))?;

    info!("HTTP Server listening on {addr}");

    axum::serve(listener, router).await.context("Server error")
  }
}

#[cfg(test)]
mod tests {
  use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
  };
  use tower::ServiceExt;

  use super::*;
  use crate::{
    entity::ReferralStatus,
    state::Config,
    sv::{
      access::{Claims, Role},
      realtor::Registration,
      referral::{Contact, StatusChange},
    },
  };

  async fn app() -> Arc<AppState> {
    let config = Config {
      database_url: "sqlite::memory:".into(),
      server_secret: "test-secret".into(),
      ..Default::default()
    };
    Arc::new(AppState::new(config).await.unwrap())
  }

  fn bearer(app: &AppState, sub: i32, role: Role) -> String {
    let exp = Utc::now().timestamp() + 600;
    let token = app.tokens.sign(&Claims { sub, role, exp }).unwrap();
    format!("Bearer {token}")
  }

  async fn call(
    app: &Arc<AppState>,
    request: Request<Body>,
  ) -> (StatusCode, json::Value) {
    let response =
      routes().with_state(app.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, json::from_slice(&body).unwrap())
  }

  async fn realtor(app: &AppState, email: &str) -> i32 {
    let form = Registration {
      first_name: "Ann".into(),
      last_name: "Lee".into(),
      email: email.into(),
      ..Default::default()
    };
    app.sv().realtor.create(form, 10, true).await.unwrap().id
  }

  #[tokio::test]
  async fn test_signup_then_scoped_listing() {
    let app = app().await;
    let ann = realtor(&app, "ann@example.com").await;
    let link = app.sv().realtor.get(ann).await.unwrap().unique_affiliate_link;

    let (status, body) = call(
      &app,
      Request::post(format!("/signup/{link}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
          r#"{"firstName":"Carl","lastName":"Buyer","email":"carl@example.com"}"#,
        ))
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");

    let (status, body) = call(
      &app,
      Request::get("/referrals")
        .header(header::AUTHORIZATION, bearer(&app, ann, Role::Realtor))
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["pages"], 1);
    assert_eq!(body["data"][0]["firstName"], "Carl");
  }

  #[tokio::test]
  async fn test_error_envelope() {
    let app = app().await;
    let ann = realtor(&app, "ann@example.com").await;
    let bob = realtor(&app, "bob@example.com").await;

    let (status, body) =
      call(&app, Request::get("/referrals").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "unauthenticated");

    let (status, body) = call(
      &app,
      Request::get(format!("/realtors/{bob}/stats"))
        .header(header::AUTHORIZATION, bearer(&app, ann, Role::Realtor))
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, body) = call(
      &app,
      Request::post("/signup/not-a-link")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
          r#"{"first_name":"C","last_name":"B","email":"c@example.com"}"#,
        ))
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_affiliate");
  }

  #[tokio::test]
  async fn test_admin_payout_over_http() {
    let app = app().await;
    let ann = realtor(&app, "ann@example.com").await;
    let admin = bearer(&app, 0, Role::Admin);

    let (status, body) = call(
      &app,
      Request::post("/payouts")
        .header(header::AUTHORIZATION, &admin)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"realtorId":{ann},"amount":500}}"#)))
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_pending_commission");

    let (status, body) = call(
      &app,
      Request::get("/get-admin-stats")
        .header(header::AUTHORIZATION, &admin)
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalAffiliates"], 1);
    assert_eq!(body["data"]["Pending"]["amount"], 0);
  }

  #[tokio::test]
  async fn test_malformed_input_uses_envelope() {
    let app = app().await;
    let admin = bearer(&app, 0, Role::Admin);

    let requests = [
      Request::post("/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"firstName":"#))
        .unwrap(),
      Request::get("/referrals?page=abc")
        .header(header::AUTHORIZATION, &admin)
        .body(Body::empty())
        .unwrap(),
      Request::get("/referrals/abc")
        .header(header::AUTHORIZATION, &admin)
        .body(Body::empty())
        .unwrap(),
    ];

    for request in requests {
      let (status, body) = call(&app, request).await;
      assert_eq!(status, StatusCode::BAD_REQUEST);
      assert_eq!(body["success"], false);
      assert_eq!(body["code"], "validation_error");
    }
  }

  #[tokio::test]
  async fn test_payout_status_filter_is_lowercase() {
    let app = app().await;
    let ann = realtor(&app, "ann@example.com").await;
    let admin = bearer(&app, 0, Role::Admin);

    let sv = app.sv();
    let link = sv.realtor.get(ann).await.unwrap().unique_affiliate_link;
    let contact = Contact {
      first_name: "Carl".into(),
      last_name: "Buyer".into(),
      email: "carl@example.com".into(),
      phone: None,
    };
    let referral = sv.referral.create(&link, contact).await.unwrap();
    let approve = StatusChange {
      status: ReferralStatus::Approved,
      loan_amount: Some(10_000),
    };
    sv.referral.update_status(referral.id, approve).await.unwrap();
    sv.payout.record(ann, 500).await.unwrap();

    let (status, body) = call(
      &app,
      Request::get("/payouts?status=paid")
        .header(header::AUTHORIZATION, &admin)
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["status"], "paid");
    assert_eq!(body["data"][0]["amount"], 500);
  }
}
