//! Quality-scored memory and context assembly.
//!
//! Memory items live in two tiers: short-term (ephemeral, per session) and
//! long-term (persisted, filtered by quality at read time). The
//! [`MemoryContextBuilder`] turns both into a bounded context block for a task.
//!
//! # Main types
//!
//! - [`MemoryStore`] — Read/write contract for memory backends.
//! - [`InMemoryMemoryStore`] / [`FileMemoryStore`] — Bundled backends.
//! - [`QualityMetrics`] / [`QualityWeights`] — Sub-metrics and their weight vector.
//! - [`MemoryContextBuilder`] — Builds a [`ContextBlock`] for a task description.
//! - [`LocalEmbedding`] — Hashing bag-of-words embedder used for relevance.

/// Memory configuration.
pub mod config;
/// Context assembly.
pub mod context;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// Quality metrics and weights.
pub mod quality;
/// Memory items and store backends.
pub mod store;

pub use config::MemoryConfig;
pub use context::{ContextBlock, ContextStatus, MemoryContextBuilder};
pub use embedding::{Embedder, LocalEmbedding};
pub use quality::{QualityMetrics, QualityWeights};
pub use store::{FileMemoryStore, InMemoryMemoryStore, MemoryItem, MemoryStore, MemoryTier};
