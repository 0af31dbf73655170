pub mod service;
pub mod tfstate;

pub use service::Service;
pub use tfstate::{LockAttempt, StoredLock, UnlockOutcome};
