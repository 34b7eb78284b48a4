use sea_orm::DbErr;

use crate::entity::ReferralStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Authentication required")]
  Unauthenticated,
  #[error("Credential expired")]
  TokenExpired,
  #[error("Access denied")]
  Forbidden,

  #[error("Unknown affiliate link")]
  UnknownAffiliate,
  #[error("Affiliate is not accepting referrals")]
  InactiveAffiliate,
  #[error("Realtor not found")]
  RealtorNotFound,
  #[error("Referral not found")]
  ReferralNotFound,
  #[error("Payout not found")]
  PayoutNotFound,

  #[error("Invalid status transition: {from} -> {to}")]
  InvalidTransition { from: ReferralStatus, to: ReferralStatus },
  #[error(
    "Insufficient pending commission: requested {requested}, available {available}"
  )]
  InsufficientPendingCommission { requested: i64, available: i64 },
  #[error("Payout failed: {0}")]
  PayoutFailed(String),

  #[error("{0}")]
  InvalidArgs(String),
  #[error("Conflict: {0}")]
  Conflict(String),
  #[error("`{0}` timed out")]
  Timeout(&'static str),

  #[error("Database error: {0}")]
  Db(#[from] DbErr),
  #[error("Internal error: {0}")]
  Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Stable machine-readable code, part of the external contract.
  pub fn code(&self) -> &'static str {
    match self {
      Self::Unauthenticated => "unauthenticated",
      Self::TokenExpired => "token_expired",
      Self::Forbidden => "forbidden",
      Self::UnknownAffiliate => "unknown_affiliate",
      Self::InactiveAffiliate => "inactive_affiliate",
      Self::RealtorNotFound | Self::ReferralNotFound | Self::PayoutNotFound => {
        "not_found"
      }
      Self::InvalidTransition { .. } => "invalid_transition",
      Self::InsufficientPendingCommission { .. } => {
        "insufficient_pending_commission"
      }
      Self::PayoutFailed(_) => "payout_failed",
      Self::InvalidArgs(_) => "validation_error",
      Self::Conflict(_) => "conflict",
      Self::Timeout(_) => "timeout",
      Self::Db(_) | Self::Internal(_) => "internal",
    }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Timeout(_) | Self::Db(DbErr::ConnectionAcquire(_)))
  }

  pub fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidArgs(msg.into())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  #[test]
  fn test_codes_are_distinct_per_kind() {
    let errors = [
      Error::Unauthenticated,
      Error::TokenExpired,
      Error::Forbidden,
      Error::UnknownAffiliate,
      Error::InactiveAffiliate,
      Error::RealtorNotFound,
      Error::InvalidTransition {
        from: ReferralStatus::Funded,
        to: ReferralStatus::Pending,
      },
      Error::InsufficientPendingCommission { requested: 2, available: 1 },
      Error::PayoutFailed("boom".into()),
      Error::invalid("bad email"),
      Error::Conflict("version moved".into()),
      Error::Timeout("record_payout"),
      Error::Internal("oops".into()),
    ];

    let codes: HashSet<_> = errors.iter().map(Error::code).collect();
    assert_eq!(codes.len(), errors.len());
  }

  #[test]
  fn test_only_timeouts_are_retryable() {
    assert!(Error::Timeout("list_referrals").is_retryable());
    assert!(!Error::Conflict("race".into()).is_retryable());
    assert!(!Error::Forbidden.is_retryable());
    assert!(
      !Error::InsufficientPendingCommission { requested: 60, available: 40 }
        .is_retryable()
    );
  }

  #[test]
  fn test_transition_message() {
    let err = Error::InvalidTransition {
      from: ReferralStatus::Funded,
      to: ReferralStatus::Pending,
    };
    assert_eq!(err.to_string(), "Invalid status transition: funded -> pending");
  }
}
