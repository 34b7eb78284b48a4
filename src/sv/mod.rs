pub mod access;
pub mod commission;
pub mod page;
pub mod payout;
pub mod realtor;
pub mod referral;
#[cfg(test)]
pub mod test_utils;

pub use commission::Commission;
pub use payout::Payout;
pub use realtor::Realtor;
pub use referral::Referral;
