use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::deposit::DepositRecord;
use crate::error::ReferralError;
use crate::referrals::Referrals;

/// One participant, its referral subtree and its deposits.
///
/// `team_size`, `performance` and `deposit_total` are derived values. They are
/// only trustworthy on a record returned by
/// [`ReferralAggregator::rollup`](crate::ReferralAggregator::rollup).
///
/// Children are owned by their parent, so a tree can only be assembled top
/// down and never holds a back-reference. Cloning a record is shallow: the
/// referral list is shared until one side mutates it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountRecord {
    pub id: String,
    pub slug: String,
    pub address: String,
    pub invitation_code: String,

    pub name: String,
    pub level: u32,
    pub join_date: DateTime<Utc>,

    pub team: String,
    pub team_size: u64,
    pub performance: f64,

    pub deposit_total: f64,
    pub ido_amount: f64,
    pub ido_performance: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrals: Option<Referrals>,
    pub deposits: Vec<DepositRecord>,
}

impl AccountRecord {
    /// An empty record for `address` with a fresh id, joined now.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address: address.into(),
            join_date: Utc::now(),
            ..Default::default()
        }
    }

    pub fn with_invitation_code(mut self, code: impl Into<String>) -> Self {
        self.invitation_code = code.into();
        self
    }

    pub fn with_referrals(mut self, referrals: Vec<AccountRecord>) -> Self {
        self.referrals = Some(Referrals::from(referrals));
        self
    }

    pub fn with_deposits(mut self, deposits: Vec<DepositRecord>) -> Self {
        self.deposits = deposits;
        self
    }

    /// Copy of this account alone, with `referrals` left absent.
    pub fn without_referrals(&self) -> AccountRecord {
        AccountRecord {
            id: self.id.clone(),
            slug: self.slug.clone(),
            address: self.address.clone(),
            invitation_code: self.invitation_code.clone(),
            name: self.name.clone(),
            level: self.level,
            join_date: self.join_date,
            team: self.team.clone(),
            team_size: self.team_size,
            performance: self.performance,
            deposit_total: self.deposit_total,
            ido_amount: self.ido_amount,
            ido_performance: self.ido_performance,
            referrals: None,
            deposits: self.deposits.clone(),
        }
    }

    /// Direct referrals; empty when the list is absent.
    pub fn referrals(&self) -> &[AccountRecord] {
        self.referrals.as_deref().unwrap_or_default()
    }

    pub fn direct_referral_count(&self) -> usize {
        self.referrals().len()
    }

    /// Number of referral levels below this account (0 for a leaf).
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(node.referrals().iter().map(|child| (child, depth + 1)));
        }
        deepest
    }

    /// Depth-first search of this subtree (self included) for the account
    /// that owns `code`.
    pub fn find_by_invitation_code(&self, code: &str) -> Option<&AccountRecord> {
        if code.is_empty() {
            return None;
        }
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.invitation_code == code {
                return Some(node);
            }
            stack.extend(node.referrals().iter().rev());
        }
        None
    }

    fn find_by_invitation_code_mut(&mut self, code: &str) -> Option<&mut AccountRecord> {
        if code.is_empty() {
            return None;
        }
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.invitation_code == code {
                return Some(node);
            }
            if let Some(children) = node.referrals.as_mut() {
                stack.extend(children.make_mut().iter_mut().rev());
            }
        }
        None
    }

    /// Attribute `child` to the account in this subtree that owns
    /// `inviter_code`.
    ///
    /// Derived totals are not touched; run the tree through the aggregator
    /// afterwards.
    pub fn attach_referral(
        &mut self,
        inviter_code: &str,
        child: AccountRecord,
    ) -> Result<(), ReferralError> {
        if self.find_by_invitation_code(&child.invitation_code).is_some() {
            return Err(ReferralError::DuplicateInvitationCode(
                child.invitation_code,
            ));
        }
        let inviter = self
            .find_by_invitation_code_mut(inviter_code)
            .ok_or_else(|| ReferralError::UnknownInvitationCode(inviter_code.to_string()))?;

        debug!(
            inviter = %inviter.id,
            referral = %child.id,
            "referral attached"
        );
        inviter
            .referrals
            .get_or_insert_with(Referrals::default)
            .make_mut()
            .push(child);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
