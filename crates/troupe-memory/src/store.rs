use crate::embedding::{cosine_similarity, Embedder, LocalEmbedding};
use crate::quality::{QualityMetrics, QualityWeights};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use troupe_core::{TroupeError, TroupeResult};
use uuid::Uuid;

/// Which memory tier an item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Ephemeral, cleared when the session ends.
    ShortTerm,
    /// Persisted, filtered by quality on read.
    LongTerm,
}

/// A single remembered piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub session_id: String,
    pub text: String,
    pub tier: MemoryTier,
    pub metrics: QualityMetrics,
    /// Always derived from `metrics` through a [`QualityWeights`] vector.
    pub quality_score: f32,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryItem {
    /// Item scored with `weights`; the embedding is filled in by the store.
    pub fn new(
        session_id: impl Into<String>,
        text: impl Into<String>,
        tier: MemoryTier,
        metrics: QualityMetrics,
        weights: &QualityWeights,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            text: text.into(),
            tier,
            metrics,
            quality_score: weights.score(&metrics),
            embedding: Vec::new(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Recompute `quality_score` from the stored metrics.
    pub fn rescore(&mut self, weights: &QualityWeights) {
        self.quality_score = weights.score(&self.metrics);
    }
}

/// Read/write contract for memory backends, partitioned by session id.
///
/// Methods are synchronous and never yield.
pub trait MemoryStore: Send + Sync {
    /// Remember `text` in the given tier.
    fn store(
        &self,
        session_id: &str,
        text: &str,
        tier: MemoryTier,
        metrics: QualityMetrics,
    ) -> TroupeResult<MemoryItem>;

    /// Up to `k` long-term items of the session with `quality_score >= min_quality`,
    /// most relevant to `text` first.
    ///
    /// The quality filter applies before the top `k` are taken.
    fn query(
        &self,
        session_id: &str,
        text: &str,
        k: usize,
        min_quality: f32,
    ) -> TroupeResult<Vec<MemoryItem>>;

    /// Short-term items of the session, most recent first.
    fn recent(&self, session_id: &str, n: usize) -> TroupeResult<Vec<MemoryItem>>;

    /// Drop the session's short-term tier. Returns the number of items removed.
    fn clear_short_term(&self, session_id: &str) -> TroupeResult<usize>;

    /// Total number of items across sessions and tiers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store using brute-force cosine similarity.
pub struct InMemoryMemoryStore {
    items: RwLock<Vec<MemoryItem>>,
    weights: QualityWeights,
    embedder: Arc<dyn Embedder>,
}

impl InMemoryMemoryStore {
    /// Store with the default local embedder.
    pub fn new(weights: QualityWeights) -> Self {
        Self::with_embedder(weights, Arc::new(LocalEmbedding::default()))
    }

    /// Store with a custom embedder.
    pub fn with_embedder(weights: QualityWeights, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            weights,
            embedder,
        }
    }

    /// Weights used to score stored items.
    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    fn build_item(
        &self,
        session_id: &str,
        text: &str,
        tier: MemoryTier,
        metrics: QualityMetrics,
    ) -> TroupeResult<MemoryItem> {
        let mut item = MemoryItem::new(session_id, text, tier, metrics, &self.weights);
        item.embedding = self.embedder.embed(text)?;
        Ok(item)
    }

    /// Insert a prebuilt item, recomputing its score with this store's weights.
    pub fn insert(&self, mut item: MemoryItem) {
        item.rescore(&self.weights);
        self.items.write().push(item);
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new(QualityWeights::default())
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn store(
        &self,
        session_id: &str,
        text: &str,
        tier: MemoryTier,
        metrics: QualityMetrics,
    ) -> TroupeResult<MemoryItem> {
        let item = self.build_item(session_id, text, tier, metrics)?;
        self.items.write().push(item.clone());
        Ok(item)
    }

    fn query(
        &self,
        session_id: &str,
        text: &str,
        k: usize,
        min_quality: f32,
    ) -> TroupeResult<Vec<MemoryItem>> {
        // An empty query has no relevance signal; fall back to recency.
        let query_embedding = if text.trim().is_empty() {
            None
        } else {
            Some(self.embedder.embed(text)?)
        };

        let items = self.items.read();
        let mut scored: Vec<(f32, usize, &MemoryItem)> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.tier == MemoryTier::LongTerm
                    && item.session_id == session_id
                    && item.quality_score >= min_quality
            })
            .map(|(pos, item)| {
                let score = query_embedding
                    .as_deref()
                    .map(|q| cosine_similarity(q, &item.embedding))
                    .unwrap_or(0.0);
                (score, pos, item)
            })
            .collect();

        // Highest relevance first; newer items win ties.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, _, item)| item.clone())
            .collect())
    }

    fn recent(&self, session_id: &str, n: usize) -> TroupeResult<Vec<MemoryItem>> {
        let items = self.items.read();
        Ok(items
            .iter()
            .rev()
            .filter(|item| item.tier == MemoryTier::ShortTerm && item.session_id == session_id)
            .take(n)
            .cloned()
            .collect())
    }

    fn clear_short_term(&self, session_id: &str) -> TroupeResult<usize> {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|item| !(item.tier == MemoryTier::ShortTerm && item.session_id == session_id));
        Ok(before - items.len())
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }
}

/// Store that persists the long-term tier as JSONL on disk.
///
/// Long-term items are loaded on open and appended on write; the short-term
/// tier is never written to disk.
pub struct FileMemoryStore {
    path: PathBuf,
    inner: InMemoryMemoryStore,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    /// Open (or create) the store at `path`, rescoring loaded items with `weights`.
    pub fn open(path: PathBuf, weights: QualityWeights) -> TroupeResult<Self> {
        Self::open_with_embedder(path, weights, Arc::new(LocalEmbedding::default()))
    }

    /// [`Self::open`] with a custom embedder.
    pub fn open_with_embedder(
        path: PathBuf,
        weights: QualityWeights,
        embedder: Arc<dyn Embedder>,
    ) -> TroupeResult<Self> {
        let inner = InMemoryMemoryStore::with_embedder(weights, embedder);

        if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| TroupeError::Memory(format!("Failed to read memory store: {e}")))?;
            let mut loaded = 0usize;
            for line in data.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let item: MemoryItem = serde_json::from_str(line)
                    .map_err(|e| TroupeError::Memory(format!("Invalid JSONL entry: {e}")))?;
                inner.insert(item);
                loaded += 1;
            }
            tracing::debug!(path = %path.display(), loaded, "Long-term memory loaded");
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TroupeError::Memory(format!("Failed to create dir: {e}")))?;
        }

        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    fn append_to_file(&self, item: &MemoryItem) -> TroupeResult<()> {
        let mut line = serde_json::to_string(item)
            .map_err(|e| TroupeError::Memory(format!("Failed to serialize item: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TroupeError::Memory(format!("Failed to open memory store: {e}")))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TroupeError::Memory(format!("Failed to write item: {e}")))?;
        Ok(())
    }
}

impl MemoryStore for FileMemoryStore {
    fn store(
        &self,
        session_id: &str,
        text: &str,
        tier: MemoryTier,
        metrics: QualityMetrics,
    ) -> TroupeResult<MemoryItem> {
        let item = self.inner.build_item(session_id, text, tier, metrics)?;
        if tier == MemoryTier::LongTerm {
            self.append_to_file(&item)?;
        }
        self.inner.items.write().push(item.clone());
        Ok(item)
    }

    fn query(
        &self,
        session_id: &str,
        text: &str,
        k: usize,
        min_quality: f32,
    ) -> TroupeResult<Vec<MemoryItem>> {
        self.inner.query(session_id, text, k, min_quality)
    }

    fn recent(&self, session_id: &str, n: usize) -> TroupeResult<Vec<MemoryItem>> {
        self.inner.recent(session_id, n)
    }

    fn clear_short_term(&self, session_id: &str) -> TroupeResult<usize> {
        self.inner.clear_short_term(session_id)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
