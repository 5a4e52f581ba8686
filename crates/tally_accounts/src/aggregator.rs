//! Rollups over a referral tree.
//!
//! Every traversal uses an explicit stack, so tree depth is bounded only by
//! memory. Each computation validates the deposits it reads and refuses to
//! produce a number when one of them is malformed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tally_core::TallyConfig;
use tracing::{debug, warn};

use crate::account::AccountRecord;
use crate::error::AggregationError;
use crate::referrals::Referrals;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Fail with [`AggregationError::CyclicReferralGraph`] when a non-empty
    /// account id occurs twice in one tree.
    pub detect_repeated_accounts: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            detect_repeated_accounts: true,
        }
    }
}

impl From<&TallyConfig> for AggregatorConfig {
    fn from(config: &TallyConfig) -> Self {
        Self {
            detect_repeated_accounts: config.detect_repeated_accounts,
        }
    }
}

// ---------------------------------------------------------------------------
// Rollup summary
// ---------------------------------------------------------------------------

/// Aggregates for the root of a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub team_size: u64,
    pub deposit_total: f64,
    pub performance: f64,
    pub direct_referrals: usize,
    pub depth: usize,
    /// Root deposits that are enabled and not withdrawn.
    pub active_deposits: usize,
    /// Root interest contracted but not yet paid.
    pub pending_interest: f64,
}

// ---------------------------------------------------------------------------
// ReferralAggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReferralAggregator {
    config: AggregatorConfig,
}

impl ReferralAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> AggregatorConfig {
        self.config
    }

    /// Number of accounts below `record` in its referral tree.
    ///
    /// Fails on a malformed deposit anywhere in the tree, like every other
    /// rollup.
    pub fn compute_team_size(&self, record: &AccountRecord) -> Result<u64, AggregationError> {
        let mut nodes = 0u64;
        self.walk(record, |node, _| {
            checked_deposit_total(node)?;
            nodes += 1;
            Ok(())
        })?;
        // The walk visits the root too.
        Ok(nodes - 1)
    }

    /// Sum of `amount` over the record's own deposits.
    pub fn compute_deposit_total(&self, record: &AccountRecord) -> Result<f64, AggregationError> {
        checked_deposit_total(record)
    }

    /// Flat sum of deposit totals over the record and its whole subtree.
    pub fn compute_performance(&self, record: &AccountRecord) -> Result<f64, AggregationError> {
        let mut performance = 0.0;
        self.walk(record, |node, _| {
            performance += checked_deposit_total(node)?;
            Ok(())
        })?;
        Ok(performance)
    }

    /// Root-level aggregates in a single pass.
    pub fn summarize(&self, record: &AccountRecord) -> Result<Rollup, AggregationError> {
        let mut nodes = 0u64;
        let mut depth = 0usize;
        let mut performance = 0.0;
        self.walk(record, |node, level| {
            nodes += 1;
            depth = depth.max(level);
            performance += checked_deposit_total(node)?;
            Ok(())
        })?;

        Ok(Rollup {
            team_size: nodes - 1,
            deposit_total: checked_deposit_total(record)?,
            performance,
            direct_referrals: record.direct_referral_count(),
            depth,
            active_deposits: record.deposits.iter().filter(|d| d.is_active()).count(),
            pending_interest: record.deposits.iter().map(|d| d.pending_interest()).sum(),
        })
    }

    /// Copy of `record` with `team_size`, `deposit_total` and `performance`
    /// recomputed at every node. The input is left untouched.
    pub fn rollup(&self, record: &AccountRecord) -> Result<AccountRecord, AggregationError> {
        self.walk(record, |node, _| checked_deposit_total(node).map(|_| ()))?;

        // Post-order rebuild: children are closed before their parent.
        let mut root = Frame::open(record);
        let mut stack: Vec<Frame<'_>> = Vec::new();
        loop {
            let top = match stack.last_mut() {
                Some(frame) => frame,
                None => &mut root,
            };
            if let Some(child) = top.pending.next() {
                stack.push(Frame::open(child));
                continue;
            }
            let Some(frame) = stack.pop() else {
                break;
            };
            let closed = frame.close();
            match stack.last_mut() {
                Some(parent) => parent.closed.push(closed),
                None => root.closed.push(closed),
            }
        }
        let rolled = root.close();

        debug!(
            account_id = %rolled.id,
            team_size = rolled.team_size,
            performance = rolled.performance,
            "rollup computed"
        );
        Ok(rolled)
    }

    /// Pre-order visit of every node with its depth below `root`, enforcing
    /// the repeated-account guard.
    fn walk<'a, F>(&self, root: &'a AccountRecord, mut visit: F) -> Result<(), AggregationError>
    where
        F: FnMut(&'a AccountRecord, usize) -> Result<(), AggregationError>,
    {
        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            if self.config.detect_repeated_accounts
                && !node.id.is_empty()
                && !seen.insert(node.id.as_str())
            {
                warn!(account_id = %node.id, root = %root.id, "account repeated in referral tree");
                return Err(AggregationError::CyclicReferralGraph {
                    account_id: node.id.clone(),
                });
            }
            visit(node, depth)?;
            stack.extend(node.referrals().iter().rev().map(|child| (child, depth + 1)));
        }
        Ok(())
    }
}

/// Validated sum of `amount` over one account's deposits.
fn checked_deposit_total(account: &AccountRecord) -> Result<f64, AggregationError> {
    let mut total = 0.0;
    for deposit in &account.deposits {
        deposit
            .validate()
            .map_err(|reason| AggregationError::MalformedRecord {
                account_id: account.id.clone(),
                deposit_id: deposit.id.clone(),
                reason,
            })?;
        total += deposit.amount;
    }
    Ok(total)
}

/// One node of the post-order rebuild in [`ReferralAggregator::rollup`].
struct Frame<'a> {
    node: AccountRecord,
    had_referrals: bool,
    pending: std::slice::Iter<'a, AccountRecord>,
    closed: Vec<AccountRecord>,
}

impl<'a> Frame<'a> {
    fn open(source: &'a AccountRecord) -> Self {
        Self {
            node: source.without_referrals(),
            had_referrals: source.referrals.is_some(),
            pending: source.referrals().iter(),
            closed: Vec::new(),
        }
    }

    fn close(self) -> AccountRecord {
        let mut node = self.node;
        node.deposit_total = node.deposits.iter().map(|d| d.amount).sum();
        node.team_size = self.closed.iter().map(|child| 1 + child.team_size).sum();
        node.performance =
            node.deposit_total + self.closed.iter().map(|child| child.performance).sum::<f64>();
        if self.had_referrals || !self.closed.is_empty() {
            node.referrals = Some(Referrals::from(self.closed));
        }
        node
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
