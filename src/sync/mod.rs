//! Write path: optimistic updates, their invalidation rules and recovery.
//!
//! - [`invalidation`] maps each write to the cache keys it makes stale
//! - [`pending`] keeps unconfirmed writes across restarts
//! - [`coordinator`] applies writes locally, then converges on the server's answer
//! - [`recovery`] replays what an earlier run left unconfirmed

pub mod coordinator;
pub mod invalidation;
pub mod page;
pub mod pending;
pub mod recovery;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Entity, Outcome, WriteCoordinator};
pub use invalidation::{invalidate, WriteAction};
pub use page::{Notice, PageState, View};
pub use pending::PendingQueue;
pub use recovery::{recover, RecoveryReport};
