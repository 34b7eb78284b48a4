pub mod payout;
pub mod realtor;
pub mod referral;

pub use payout::PayoutStatus;
pub use referral::ReferralStatus;
