//! Session state for the account dashboard: the observable `UserData`
//! store and the glue that fills it from external providers.

pub mod store;
pub mod sync;
pub mod user_data;

pub use store::{ApplyOutcome, FetchToken, StoreEvent, SubscriptionId, UserDataStore};
pub use sync::{AccountProvider, BalanceProvider, Balances, SessionSync};
pub use user_data::{UserData, UserDataPatch};
