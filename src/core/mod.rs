pub mod constants;
pub mod error;
pub mod lock_store;
pub mod types;

pub use constants::*;
pub use error::ExecutionError;
pub use lock_store::{BuyLockStore, LockToken};
pub use types::*;
