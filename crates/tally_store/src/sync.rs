//! Fills a [`UserDataStore`] from external account and balance sources.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_accounts::{AccountRecord, AggregatorConfig, ReferralAggregator};
use tally_core::{TallyConfig, TallyError};
use tracing::{debug, info, warn};

use crate::store::{ApplyOutcome, UserDataStore};
use crate::user_data::UserDataPatch;

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

/// Live wallet balances for one address.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub eth: f64,
    pub usdt: f64,
}

/// Source of an account and its referral tree, as stored upstream.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn fetch_account(&self, address: &str) -> anyhow::Result<AccountRecord>;
}

#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn fetch_balances(&self, address: &str) -> anyhow::Result<Balances>;
}

// ---------------------------------------------------------------------------
// SessionSync
// ---------------------------------------------------------------------------

pub struct SessionSync {
    store: Arc<UserDataStore>,
    accounts: Arc<dyn AccountProvider>,
    balances: Arc<dyn BalanceProvider>,
    aggregator: ReferralAggregator,
}

impl SessionSync {
    pub fn new(
        store: Arc<UserDataStore>,
        accounts: Arc<dyn AccountProvider>,
        balances: Arc<dyn BalanceProvider>,
    ) -> Self {
        Self {
            store,
            accounts,
            balances,
            aggregator: ReferralAggregator::default(),
        }
    }

    pub fn with_aggregator(mut self, aggregator: ReferralAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Sync over a fresh store, with store and aggregator settings taken from
    /// `config`.
    pub fn from_config(
        config: &TallyConfig,
        accounts: Arc<dyn AccountProvider>,
        balances: Arc<dyn BalanceProvider>,
    ) -> Self {
        Self::new(Arc::new(UserDataStore::with_config(config)), accounts, balances)
            .with_aggregator(ReferralAggregator::new(AggregatorConfig::from(config)))
    }

    pub fn store(&self) -> &Arc<UserDataStore> {
        &self.store
    }

    /// Fetch the account and balances for `address`, recompute the derived
    /// totals and merge the result into the store.
    ///
    /// On error the stored data is left as it was. The loading flag is
    /// cleared in every case unless a newer refresh has started meanwhile.
    pub async fn refresh(&self, address: &str) -> Result<ApplyOutcome, TallyError> {
        let token = self.store.begin_fetch();
        debug!(address, "refresh started");

        let result = self.fetch_patch(address).await.map(|patch| {
            self.store.apply_fetched(token, patch)
        });
        self.store.finish_fetch(token);

        match &result {
            Ok(ApplyOutcome::Applied) => info!(address, "user data refreshed"),
            Ok(ApplyOutcome::Stale) => debug!(address, "refresh overtaken by newer data"),
            Err(e) => warn!(address, category = ?e.category(), "refresh failed: {e}"),
        }
        result
    }

    /// Refresh the configured `default_address`. `Ok(None)` when none is set.
    pub async fn refresh_default(
        &self,
        config: &TallyConfig,
    ) -> Result<Option<ApplyOutcome>, TallyError> {
        match config.default_address.as_deref() {
            Some(address) if !address.is_empty() => self.refresh(address).await.map(Some),
            _ => Ok(None),
        }
    }

    async fn fetch_patch(&self, address: &str) -> Result<UserDataPatch, TallyError> {
        let (account, balances) = tokio::join!(
            self.accounts.fetch_account(address),
            self.balances.fetch_balances(address),
        );
        let account = account.map_err(|e| TallyError::Provider(format!("{e:#}")))?;
        let balances = balances.map_err(|e| TallyError::Provider(format!("{e:#}")))?;

        let rolled = self.aggregator.rollup(&account)?;
        Ok(UserDataPatch::from_account(rolled).with_balances(balances.eth, balances.usdt))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::{Duration, TimeZone, Utc};
    use tally_accounts::DepositRecord;
    use tokio::sync::Notify;

    use crate::user_data::UserData;

    fn deposit(id: &str, amount: f64) -> DepositRecord {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        DepositRecord::new(id, "0xabc", amount, start, start + Duration::days(90))
    }

    fn account(id: &str, deposits: Vec<DepositRecord>) -> AccountRecord {
        AccountRecord {
            id: id.into(),
            name: id.into(),
            ..Default::default()
        }
        .with_deposits(deposits)
    }

    fn tree() -> AccountRecord {
        account("root", vec![deposit("d1", 100.0)]).with_referrals(vec![
            account("a", vec![deposit("d2", 250.5)])
                .with_referrals(vec![account("c", Vec::new())]),
            account("b", Vec::new()),
        ])
    }

    /// Serves `tree()` for any address, optionally holding the response for
    /// one address until released.
    #[derive(Default)]
    struct FakeAccounts {
        malformed: bool,
        failing: bool,
        hold: Option<(String, Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl AccountProvider for FakeAccounts {
        async fn fetch_account(&self, address: &str) -> anyhow::Result<AccountRecord> {
            if self.failing {
                return Err(anyhow!("connection refused"));
            }
            if let Some((held, entered, release)) = &self.hold {
                if held == address {
                    entered.notify_one();
                    release.notified().await;
                }
            }
            let mut record = tree();
            record.name = address.to_string();
            if self.malformed {
                record.deposits[0].interest = 1.0;
                record.deposits[0].interest_received = 2.0;
            }
            Ok(record)
        }
    }

    struct FakeBalances(Balances);

    #[async_trait]
    impl BalanceProvider for FakeBalances {
        async fn fetch_balances(&self, _address: &str) -> anyhow::Result<Balances> {
            Ok(self.0)
        }
    }

    fn sync_with(accounts: FakeAccounts) -> SessionSync {
        SessionSync::new(
            Arc::new(UserDataStore::new()),
            Arc::new(accounts),
            Arc::new(FakeBalances(Balances { eth: 0.25, usdt: 80.0 })),
        )
    }

    #[tokio::test]
    async fn refresh_populates_store() {
        let sync = sync_with(FakeAccounts::default());
        let outcome = sync.refresh("0xabc").await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let data = sync.store().get();
        assert_eq!(data.account.name, "0xabc");
        assert_eq!(data.account.team_size, 3);
        assert_eq!(data.account.deposit_total, 100.0);
        assert_eq!(data.account.performance, 350.5);
        assert_eq!(data.eth_balance, 0.25);
        assert_eq!(data.usdt_balance, 80.0);
        assert!(!sync.store().is_loading());
    }

    #[tokio::test]
    async fn malformed_data_leaves_store_untouched() {
        let sync = sync_with(FakeAccounts {
            malformed: true,
            ..Default::default()
        });
        sync.store().update(UserDataPatch::balances(9.0, 9.0));
        let before = sync.store().get();

        let err = sync.refresh("0xabc").await.unwrap_err();
        assert!(matches!(err, TallyError::MalformedRecord(_)));
        assert_eq!(*sync.store().get(), *before);
        assert!(!sync.store().is_loading());
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let sync = sync_with(FakeAccounts {
            failing: true,
            ..Default::default()
        });
        let err = sync.refresh("0xabc").await.unwrap_err();
        assert!(matches!(err, TallyError::Provider(ref m) if m.contains("connection refused")));
        assert!(err.keeps_previous_view());
        assert!(!sync.store().is_loading());
    }

    #[tokio::test]
    async fn refresh_default_uses_configured_address() {
        let accounts: Arc<dyn AccountProvider> = Arc::new(FakeAccounts::default());
        let balances: Arc<dyn BalanceProvider> = Arc::new(FakeBalances(Balances::default()));

        let unset = TallyConfig::default();
        let sync = SessionSync::from_config(&unset, Arc::clone(&accounts), Arc::clone(&balances));
        assert_eq!(sync.refresh_default(&unset).await.unwrap(), None);
        assert_eq!(*sync.store().get(), UserData::default());

        let config = TallyConfig {
            default_address: Some("0xdefault".into()),
            ..Default::default()
        };
        let sync = SessionSync::from_config(&config, accounts, balances);
        assert_eq!(
            sync.refresh_default(&config).await.unwrap(),
            Some(ApplyOutcome::Applied)
        );
        assert_eq!(sync.store().get().account.name, "0xdefault");
    }

    #[tokio::test]
    async fn repeated_account_rejected_unless_guard_disabled() {
        struct Repeating;

        #[async_trait]
        impl AccountProvider for Repeating {
            async fn fetch_account(&self, _address: &str) -> anyhow::Result<AccountRecord> {
                Ok(account("root", Vec::new())
                    .with_referrals(vec![account("x", Vec::new()), account("x", Vec::new())]))
            }
        }

        let balances: Arc<dyn BalanceProvider> = Arc::new(FakeBalances(Balances::default()));
        let sync = SessionSync::from_config(
            &TallyConfig::default(),
            Arc::new(Repeating),
            Arc::clone(&balances),
        );
        let err = sync.refresh("0xabc").await.unwrap_err();
        assert!(matches!(err, TallyError::CyclicReferralGraph { ref account_id } if account_id == "x"));

        let lenient = TallyConfig {
            detect_repeated_accounts: false,
            ..Default::default()
        };
        let sync = SessionSync::from_config(&lenient, Arc::new(Repeating), balances);
        sync.refresh("0xabc").await.unwrap();
        assert_eq!(sync.store().get().account.team_size, 2);
    }

    #[tokio::test]
    async fn slower_earlier_refresh_is_discarded() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let sync = Arc::new(sync_with(FakeAccounts {
            hold: Some(("0xslow".into(), Arc::clone(&entered), Arc::clone(&release))),
            ..Default::default()
        }));

        let slow = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.refresh("0xslow").await })
        };
        entered.notified().await;

        let fast = sync.refresh("0xfast").await.unwrap();
        assert_eq!(fast, ApplyOutcome::Applied);
        assert!(!sync.store().is_loading());

        release.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow, ApplyOutcome::Stale);
        assert_eq!(sync.store().get().account.name, "0xfast");
        assert!(!sync.store().is_loading());
    }

    #[tokio::test]
    async fn loading_stays_set_while_newer_refresh_runs() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let sync = Arc::new(sync_with(FakeAccounts {
            hold: Some(("0xslow".into(), Arc::clone(&entered), Arc::clone(&release))),
            ..Default::default()
        }));

        // A refresh that completes while a newer one is still in flight must
        // not clear the newer one's loading flag.
        let token = sync.store().begin_fetch();
        let newer = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.refresh("0xslow").await })
        };
        entered.notified().await;

        sync.store().finish_fetch(token);
        assert!(sync.store().is_loading());

        release.notify_one();
        newer.await.unwrap().unwrap();
        assert!(!sync.store().is_loading());
    }
}
