use crate::prelude::*;

/// Amounts are stored in cents.
pub const CENTS: i64 = 100;

pub fn format_usd(cents: i64) -> String {
  let sign = if cents < 0 { "-" } else { "" };
  let cents = cents.unsigned_abs();
  format!("{sign}${}.{:02}", cents / CENTS as u64, cents % CENTS as u64)
}

pub fn affiliate_url(base_url: &str, link: &str) -> String {
  format!("{}/r/{}", base_url.trim_end_matches('/'), link)
}

/// Fresh unguessable affiliate link token.
pub fn new_link() -> String {
  uuid::Uuid::new_v4().simple().to_string()
}

pub fn now() -> DateTime {
  Utc::now().naive_utc()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_usd() {
    assert_eq!(format_usd(2_500_000), "$25000.00");
    assert_eq!(format_usd(105), "$1.05");
    assert_eq!(format_usd(-50), "-$0.50");
  }

  #[test]
  fn test_affiliate_url() {
    assert_eq!(
      affiliate_url("https://refer.example.com/", "abc"),
      "https://refer.example.com/r/abc"
    );
  }

  #[test]
  fn test_links_are_unique() {
    assert_ne!(new_link(), new_link());
    assert_eq!(new_link().len(), 32);
  }
}
