//! Run-scoped state for the Troupe engine.
//!
//! - [`StateStore`] — typed key/value store owned by exactly one run.
//! - [`RunSnapshot`] — serializable image of a run (state + completed tasks).
//! - [`SessionStore`] — persistence backend for snapshots, keyed by session id.

/// Persisted run images.
pub mod snapshot;
/// Shared run state.
pub mod state;
/// Snapshot persistence.
pub mod store;

pub use snapshot::RunSnapshot;
pub use state::StateStore;
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
