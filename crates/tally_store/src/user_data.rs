use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tally_accounts::{AccountRecord, DepositRecord, Referrals};

/// The session's account view: every account field plus live balances.
///
/// Cloning is shallow in the referral tree (see [`Referrals`]), so a store
/// write costs the same for a leaf and for a deep team.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserData {
    #[serde(flatten)]
    pub account: AccountRecord,
    pub eth_balance: f64,
    pub usdt_balance: f64,
}

impl From<AccountRecord> for UserData {
    fn from(account: AccountRecord) -> Self {
        Self {
            account,
            ..Default::default()
        }
    }
}

/// A partial [`UserData`]. Only `Some` fields replace the current value.
///
/// `referrals` is doubly optional: `Some(None)` clears the list, `None`
/// leaves it alone. In JSON an explicit `null` means `Some(None)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ido_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ido_performance: Option<f64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub referrals: Option<Option<Referrals>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposits: Option<Vec<DepositRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usdt_balance: Option<f64>,
}

/// Maps a present key to `Some`, even when its value is `null`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl UserDataPatch {
    /// Patch replacing every account field and leaving balances alone.
    pub fn from_account(account: AccountRecord) -> Self {
        Self {
            id: Some(account.id),
            slug: Some(account.slug),
            address: Some(account.address),
            invitation_code: Some(account.invitation_code),
            name: Some(account.name),
            level: Some(account.level),
            join_date: Some(account.join_date),
            team: Some(account.team),
            team_size: Some(account.team_size),
            performance: Some(account.performance),
            deposit_total: Some(account.deposit_total),
            ido_amount: Some(account.ido_amount),
            ido_performance: Some(account.ido_performance),
            referrals: Some(account.referrals),
            deposits: Some(account.deposits),
            eth_balance: None,
            usdt_balance: None,
        }
    }

    /// Patch replacing only the live balances.
    pub fn balances(eth: f64, usdt: f64) -> Self {
        Self::default().with_balances(eth, usdt)
    }

    pub fn with_balances(mut self, eth: f64, usdt: f64) -> Self {
        self.eth_balance = Some(eth);
        self.usdt_balance = Some(usdt);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Replace the fields of `data` that this patch sets.
    pub fn apply_to(self, data: &mut UserData) {
        let account = &mut data.account;
        if let Some(v) = self.id {
            account.id = v;
        }
        if let Some(v) = self.slug {
            account.slug = v;
        }
        if let Some(v) = self.address {
            account.address = v;
        }
        if let Some(v) = self.invitation_code {
            account.invitation_code = v;
        }
        if let Some(v) = self.name {
            account.name = v;
        }
        if let Some(v) = self.level {
            account.level = v;
        }
        if let Some(v) = self.join_date {
            account.join_date = v;
        }
        if let Some(v) = self.team {
            account.team = v;
        }
        if let Some(v) = self.team_size {
            account.team_size = v;
        }
        if let Some(v) = self.performance {
            account.performance = v;
        }
        if let Some(v) = self.deposit_total {
            account.deposit_total = v;
        }
        if let Some(v) = self.ido_amount {
            account.ido_amount = v;
        }
        if let Some(v) = self.ido_performance {
            account.ido_performance = v;
        }
        if let Some(v) = self.referrals {
            account.referrals = v;
        }
        if let Some(v) = self.deposits {
            account.deposits = v;
        }
        if let Some(v) = self.eth_balance {
            data.eth_balance = v;
        }
        if let Some(v) = self.usdt_balance {
            data.usdt_balance = v;
        }
    }
}

impl From<UserData> for UserDataPatch {
    fn from(data: UserData) -> Self {
        Self::from_account(data.account).with_balances(data.eth_balance, data.usdt_balance)
    }
}

impl From<&UserData> for UserDataPatch {
    fn from(data: &UserData) -> Self {
        Self::from(data.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
