//! Account, deposit and referral-tree model with the validating aggregator
//! that derives team size, deposit totals and performance.

pub mod account;
pub mod aggregator;
pub mod deposit;
pub mod error;
pub mod referrals;

// Re-export primary types for convenient access.
pub use account::AccountRecord;
pub use aggregator::{AggregatorConfig, ReferralAggregator, Rollup};
pub use deposit::DepositRecord;
pub use error::{AggregationError, DepositStateError, MalformedReason, ReferralError};
pub use referrals::Referrals;
