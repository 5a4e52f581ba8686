use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tally_core::TallyConfig;
use tracing::{debug, info};

use crate::user_data::{UserData, UserDataPatch};

pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A patch was merged; carries the new snapshot.
    DataChanged(Arc<UserData>),
    LoadingChanged(bool),
    /// The store was returned to its empty state.
    Reset,
}

/// Identifies one fetch started with [`UserDataStore::begin_fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer fetch or a direct update happened after the token was issued.
    Stale,
}

struct StoreState {
    data: Arc<UserData>,
    loading: bool,
    /// Bumped by every `begin_fetch`, `update` and `reset`.
    generation: u64,
    /// Token of the most recent `begin_fetch`.
    latest_fetch: u64,
}

// ---------------------------------------------------------------------------
// UserDataStore
// ---------------------------------------------------------------------------

/// In-memory holder of the current session's [`UserData`].
///
/// Shared by reference (`Arc<UserDataStore>`) between the code that fetches
/// account data and the views that read it. Readers get cheap `Arc`
/// snapshots; each merge replaces the snapshot under one write lock, so a
/// reader sees either the whole patch or none of it.
///
/// Subscriber callbacks run after the lock is released and may call back
/// into the store.
pub struct UserDataStore {
    state: RwLock<StoreState>,
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,
    next_subscription: AtomicU64,
    discard_stale_fetches: bool,
}

impl UserDataStore {
    pub fn new() -> Self {
        Self::with_stale_discard(true)
    }

    pub fn with_config(config: &TallyConfig) -> Self {
        Self::with_stale_discard(config.discard_stale_fetches)
    }

    fn with_stale_discard(discard_stale_fetches: bool) -> Self {
        Self {
            state: RwLock::new(StoreState {
                data: Arc::new(UserData::default()),
                loading: false,
                generation: 0,
                latest_fetch: 0,
            }),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            discard_stale_fetches,
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<UserData> {
        Arc::clone(&self.state.read().data)
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Merge `patch` into the current data and notify subscribers.
    ///
    /// Accepts any patch without validation. Fetches started before this
    /// call become stale.
    pub fn update(&self, patch: UserDataPatch) {
        let snapshot = {
            let mut state = self.state.write();
            state.generation += 1;
            Self::merge(&mut state, patch)
        };
        self.notify(&StoreEvent::DataChanged(snapshot));
    }

    pub fn set_loading(&self, loading: bool) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.loading != loading;
            state.loading = loading;
            changed
        };
        if changed {
            self.notify(&StoreEvent::LoadingChanged(loading));
        }
    }

    /// Return to the empty record with loading cleared.
    pub fn reset(&self) {
        {
            let mut state = self.state.write();
            state.data = Arc::new(UserData::default());
            state.loading = false;
            state.generation += 1;
        }
        info!("user data store reset");
        self.notify(&StoreEvent::Reset);
    }

    // -- Fetch sequencing ---------------------------------------------------

    /// Register the start of an external fetch and raise the loading flag.
    ///
    /// Both happen under one lock, so a newer fetch always owns the flag it
    /// raised.
    pub fn begin_fetch(&self) -> FetchToken {
        let (token, raised) = {
            let mut state = self.state.write();
            state.generation += 1;
            state.latest_fetch = state.generation;
            let raised = !state.loading;
            state.loading = true;
            (FetchToken(state.generation), raised)
        };
        if raised {
            self.notify(&StoreEvent::LoadingChanged(true));
        }
        token
    }

    /// Merge the result of the fetch identified by `token`, unless it has
    /// been overtaken and stale results are being discarded.
    pub fn apply_fetched(&self, token: FetchToken, patch: UserDataPatch) -> ApplyOutcome {
        let snapshot = {
            let mut state = self.state.write();
            if self.discard_stale_fetches && token.0 != state.generation {
                debug!(
                    token = token.0,
                    generation = state.generation,
                    "discarding stale fetch result"
                );
                return ApplyOutcome::Stale;
            }
            Self::merge(&mut state, patch)
        };
        self.notify(&StoreEvent::DataChanged(snapshot));
        ApplyOutcome::Applied
    }

    /// Clear the loading flag if `token` is the most recent fetch.
    pub fn finish_fetch(&self, token: FetchToken) {
        let owns_loading = {
            let state = self.state.read();
            !self.discard_stale_fetches || token.0 == state.latest_fetch
        };
        if owns_loading {
            self.set_loading(false);
        }
    }

    fn merge(state: &mut StoreState, patch: UserDataPatch) -> Arc<UserData> {
        let mut next = UserData::clone(&state.data);
        patch.apply_to(&mut next);
        state.data = Arc::new(next);
        Arc::clone(&state.data)
    }

    // -- Subscriptions ------------------------------------------------------

    pub fn subscribe(&self, callback: impl Fn(&StoreEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, Arc::new(callback)));
        debug!(subscription = id, "store subscriber added");
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn notify(&self, event: &StoreEvent) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl Default for UserDataStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
