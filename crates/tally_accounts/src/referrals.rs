use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::account::AccountRecord;

/// Direct referrals of one account.
///
/// The list is shared: cloning an account copies a pointer, not the subtree.
/// Mutation goes through [`Referrals::make_mut`], which copies only this
/// level when the list is shared. Dropping the last owner unwinds the subtree
/// with a work-list, so arbitrarily deep trees can be freed.
#[derive(Clone, Default)]
pub struct Referrals(Option<Arc<Vec<AccountRecord>>>);

impl Referrals {
    /// Mutable access to the children, copying this level if it is shared.
    pub fn make_mut(&mut self) -> &mut Vec<AccountRecord> {
        Arc::make_mut(self.0.get_or_insert_with(Default::default))
    }

    /// Whether `self` and `other` point at the same list.
    pub fn shares_with(&self, other: &Referrals) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Deref for Referrals {
    type Target = [AccountRecord];

    fn deref(&self) -> &[AccountRecord] {
        self.0.as_deref().map(Vec::as_slice).unwrap_or_default()
    }
}

impl From<Vec<AccountRecord>> for Referrals {
    fn from(children: Vec<AccountRecord>) -> Self {
        Self(Some(Arc::new(children)))
    }
}

impl PartialEq for Referrals {
    fn eq(&self, other: &Self) -> bool {
        self.shares_with(other) || **self == **other
    }
}

impl fmt::Debug for Referrals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Drop for Referrals {
    fn drop(&mut self) {
        let Some(mut pending) = self.0.take().and_then(Arc::into_inner) else {
            return;
        };
        while let Some(mut node) = pending.pop() {
            let children = node
                .referrals
                .as_mut()
                .and_then(|r| r.0.take())
                .and_then(Arc::into_inner);
            if let Some(children) = children {
                pending.extend(children);
            }
        }
    }
}

impl Serialize for Referrals {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for Referrals {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<AccountRecord>::deserialize(deserializer).map(Self::from)
    }
}
