//! Scheduling loops for the three process kinds.
//!
//! Each loop selects work under the state lock, releases it, and hands the
//! batch to [`crate::ProcessEngine`] for execution. Halting is checked before
//! every selection.

mod hierarchical;
mod sequential;
mod workflow;
