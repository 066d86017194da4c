mod actor;
mod store;

pub use actor::{AccountHandle, AccountSnapshot, AccountStatus, spawn};
pub use store::{Account, TokenStore};
