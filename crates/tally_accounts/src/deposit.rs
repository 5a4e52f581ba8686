use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DepositStateError, MalformedReason};

/// One fixed-term principal + interest position, owned by a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub id: String,
    /// Owning account address.
    pub address: String,
    /// External chain transaction reference.
    pub txid: String,

    pub amount: f64,
    /// Rate per cycle.
    pub interest_rate: f64,
    pub cycle: u32,

    /// Total contracted interest.
    pub interest: f64,
    /// Interest paid out so far; never exceeds `interest`.
    pub interest_received: f64,
    /// Unrealized accrual for the current cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_interest: Option<f64>,

    pub is_enabled: bool,
    pub is_withdrawn: bool,
    #[serde(rename = "is_extracting", default)]
    pub is_extracting: bool,
    #[serde(rename = "is_buy", default)]
    pub is_buy: bool,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DepositRecord {
    /// An enabled deposit with no interest terms, created at `start_time`.
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        amount: f64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            txid: String::new(),
            amount,
            interest_rate: 0.0,
            cycle: 0,
            interest: 0.0,
            interest_received: 0.0,
            current_interest: None,
            is_enabled: true,
            is_withdrawn: false,
            is_extracting: false,
            is_buy: false,
            start_time,
            end_time,
            created_at: start_time,
        }
    }

    pub fn with_interest(mut self, interest: f64, interest_received: f64) -> Self {
        self.interest = interest;
        self.interest_received = interest_received;
        self
    }

    pub fn with_txid(mut self, txid: impl Into<String>) -> Self {
        self.txid = txid.into();
        self
    }

    /// Check every stored invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), MalformedReason> {
        if !is_non_negative(self.amount) {
            return Err(MalformedReason::InvalidAmount(self.amount));
        }
        if !is_non_negative(self.interest) {
            return Err(MalformedReason::InvalidInterest(self.interest));
        }
        if !is_non_negative(self.interest_received) {
            return Err(MalformedReason::InvalidInterestReceived(
                self.interest_received,
            ));
        }
        if self.interest_received > self.interest {
            return Err(MalformedReason::InterestOverpaid {
                received: self.interest_received,
                contracted: self.interest,
            });
        }
        if self.end_time < self.start_time {
            return Err(MalformedReason::EndBeforeStart);
        }
        if self.created_at > self.start_time {
            return Err(MalformedReason::CreatedAfterStart);
        }
        Ok(())
    }

    /// Contracted interest not yet paid out.
    pub fn pending_interest(&self) -> f64 {
        self.interest - self.interest_received
    }

    /// Enabled and principal not yet returned.
    pub fn is_active(&self) -> bool {
        self.is_enabled && !self.is_withdrawn
    }

    pub fn has_matured(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Mark a withdrawal as in flight.
    pub fn begin_withdrawal(&mut self) -> Result<(), DepositStateError> {
        if self.is_withdrawn {
            return Err(DepositStateError::AlreadyWithdrawn(self.id.clone()));
        }
        if self.is_extracting {
            return Err(DepositStateError::AlreadyExtracting(self.id.clone()));
        }
        self.is_extracting = true;
        info!(deposit_id = %self.id, "withdrawal started");
        Ok(())
    }

    /// Record the principal as returned. Happens at most once.
    pub fn settle_withdrawal(&mut self) -> Result<(), DepositStateError> {
        if self.is_withdrawn {
            return Err(DepositStateError::AlreadyWithdrawn(self.id.clone()));
        }
        self.is_withdrawn = true;
        self.is_extracting = false;
        info!(deposit_id = %self.id, amount = self.amount, "withdrawal settled");
        Ok(())
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn deposit(amount: f64) -> DepositRecord {
        DepositRecord::new("dep-1", "0xabc", amount, start(), start() + Duration::days(30))
    }

    #[test]
    fn valid_deposit_passes() {
        let d = deposit(100.0).with_interest(10.0, 4.0);
        assert_eq!(d.validate(), Ok(()));
        assert_eq!(d.pending_interest(), 6.0);
    }

    #[test]
    fn zero_amount_is_valid() {
        assert_eq!(deposit(0.0).validate(), Ok(()));
    }

    #[test]
    fn negative_amount_is_malformed() {
        assert_eq!(
            deposit(-1.0).validate(),
            Err(MalformedReason::InvalidAmount(-1.0))
        );
    }

    #[test]
    fn nan_amount_is_malformed() {
        assert!(matches!(
            deposit(f64::NAN).validate(),
            Err(MalformedReason::InvalidAmount(_))
        ));
    }

    #[test]
    fn negative_interest_is_malformed() {
        let d = deposit(1.0).with_interest(-3.0, 0.0);
        assert_eq!(d.validate(), Err(MalformedReason::InvalidInterest(-3.0)));

        let d = deposit(1.0).with_interest(3.0, -0.5);
        assert_eq!(
            d.validate(),
            Err(MalformedReason::InvalidInterestReceived(-0.5))
        );
    }

    #[test]
    fn overpaid_interest_is_malformed() {
        let d = deposit(1.0).with_interest(10.0, 15.0);
        assert_eq!(
            d.validate(),
            Err(MalformedReason::InterestOverpaid {
                received: 15.0,
                contracted: 10.0
            })
        );
    }

    #[test]
    fn fully_paid_interest_is_valid() {
        let d = deposit(1.0).with_interest(10.0, 10.0);
        assert_eq!(d.validate(), Ok(()));
        assert_eq!(d.pending_interest(), 0.0);
    }

    #[test]
    fn end_before_start_is_malformed() {
        let mut d = deposit(1.0);
        d.end_time = d.start_time - Duration::seconds(1);
        assert_eq!(d.validate(), Err(MalformedReason::EndBeforeStart));
    }

    #[test]
    fn created_after_start_is_malformed() {
        let mut d = deposit(1.0);
        d.created_at = d.start_time + Duration::hours(1);
        assert_eq!(d.validate(), Err(MalformedReason::CreatedAfterStart));
    }

    #[test]
    fn withdrawal_lifecycle() {
        let mut d = deposit(50.0);
        assert!(d.is_active());

        d.begin_withdrawal().unwrap();
        assert!(d.is_extracting);
        assert_eq!(
            d.begin_withdrawal(),
            Err(DepositStateError::AlreadyExtracting("dep-1".into()))
        );

        d.settle_withdrawal().unwrap();
        assert!(d.is_withdrawn);
        assert!(!d.is_extracting);
        assert!(!d.is_active());
    }

    #[test]
    fn withdrawal_settles_exactly_once() {
        let mut d = deposit(50.0);
        d.settle_withdrawal().unwrap();
        assert_eq!(
            d.settle_withdrawal(),
            Err(DepositStateError::AlreadyWithdrawn("dep-1".into()))
        );
        assert_eq!(
            d.begin_withdrawal(),
            Err(DepositStateError::AlreadyWithdrawn("dep-1".into()))
        );
        assert!(d.is_withdrawn);
    }

    #[test]
    fn disabled_deposit_is_not_active() {
        let mut d = deposit(5.0);
        d.is_enabled = false;
        assert!(!d.is_active());
    }

    #[test]
    fn maturity() {
        let d = deposit(5.0);
        assert!(!d.has_matured(start()));
        assert!(d.has_matured(start() + Duration::days(30)));
    }

    #[test]
    fn wire_names() {
        let mut d = deposit(100.0).with_interest(10.0, 2.5).with_txid("0xtx");
        d.is_extracting = true;
        d.is_buy = true;
        let value = serde_json::to_value(&d).unwrap();

        assert_eq!(value["interestReceived"], 2.5);
        assert_eq!(value["interestRate"], 0.0);
        assert_eq!(value["isEnabled"], true);
        assert_eq!(value["isWithdrawn"], false);
        assert_eq!(value["is_extracting"], true);
        assert_eq!(value["is_buy"], true);
        assert_eq!(value["txid"], "0xtx");
        assert_eq!(value["startTime"], "2024-03-01T00:00:00Z");
        assert!(value.get("currentInterest").is_none());
    }

    #[test]
    fn parses_payload_without_optional_flags() {
        let json = r#"{
            "id": "d1",
            "address": "0xabc",
            "txid": "0xdeadbeef",
            "amount": 250.5,
            "interestRate": 0.01,
            "cycle": 3,
            "interest": 7.5,
            "interestReceived": 2.5,
            "currentInterest": 0.25,
            "isEnabled": true,
            "isWithdrawn": false,
            "startTime": "2024-03-01T00:00:00Z",
            "endTime": "2024-04-01T00:00:00Z",
            "createdAt": "2024-02-29T23:59:00Z"
        }"#;
        let d: DepositRecord = serde_json::from_str(json).unwrap();
        assert_eq!(d.amount, 250.5);
        assert_eq!(d.cycle, 3);
        assert_eq!(d.current_interest, Some(0.25));
        assert!(!d.is_extracting);
        assert!(!d.is_buy);
        assert_eq!(d.validate(), Ok(()));
    }
}
