use tally_core::TallyError;
use thiserror::Error;

/// Why a deposit failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedReason {
    #[error("amount {0} is negative or not finite")]
    InvalidAmount(f64),

    #[error("interest {0} is negative or not finite")]
    InvalidInterest(f64),

    #[error("interest received {0} is negative or not finite")]
    InvalidInterestReceived(f64),

    #[error("interest received {received} exceeds contracted interest {contracted}")]
    InterestOverpaid { received: f64, contracted: f64 },

    #[error("end time precedes start time")]
    EndBeforeStart,

    #[error("created after start time")]
    CreatedAfterStart,
}

/// Failure to derive rollups from an account tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("malformed deposit {deposit_id} on account {account_id}: {reason}")]
    MalformedRecord {
        account_id: String,
        deposit_id: String,
        reason: MalformedReason,
    },

    #[error("account {account_id} appears more than once in the referral tree")]
    CyclicReferralGraph { account_id: String },
}

/// Failure to attach a referral to a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferralError {
    #[error("no account owns invitation code {0:?}")]
    UnknownInvitationCode(String),

    #[error("invitation code {0:?} is already used in this tree")]
    DuplicateInvitationCode(String),
}

/// Invalid lifecycle transition on a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepositStateError {
    #[error("deposit {0} has already been withdrawn")]
    AlreadyWithdrawn(String),

    #[error("deposit {0} is already being withdrawn")]
    AlreadyExtracting(String),
}

impl From<AggregationError> for TallyError {
    fn from(err: AggregationError) -> Self {
        match err {
            AggregationError::MalformedRecord { .. } => TallyError::MalformedRecord(err.to_string()),
            AggregationError::CyclicReferralGraph { account_id } => {
                TallyError::CyclicReferralGraph { account_id }
            }
        }
    }
}
