use crate::config::MemoryConfig;
use crate::embedding::tokenize;
use crate::store::{MemoryItem, MemoryStore, MemoryTier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use troupe_core::TroupeResult;

/// Rendered when no item qualifies.
pub const EMPTY_CONTEXT_MARKER: &str = "[no relevant memory]";
/// Rendered when the store could not be read.
pub const UNAVAILABLE_CONTEXT_MARKER: &str = "[memory unavailable]";

/// Whether a context block carries memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    /// At least one item was included.
    Populated,
    /// The store answered but nothing qualified.
    Empty,
    /// The store could not be consulted.
    Unavailable,
}

/// A bounded block of memory text ready to inject into a task's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub status: ContextStatus,
    /// Items included, in rendering order.
    pub items: Vec<MemoryItem>,
    pub text: String,
}

impl ContextBlock {
    /// Block for when nothing qualified.
    pub fn empty() -> Self {
        Self {
            status: ContextStatus::Empty,
            items: Vec::new(),
            text: EMPTY_CONTEXT_MARKER.to_string(),
        }
    }

    /// Block for when the store errored.
    pub fn unavailable() -> Self {
        Self {
            status: ContextStatus::Unavailable,
            items: Vec::new(),
            text: UNAVAILABLE_CONTEXT_MARKER.to_string(),
        }
    }

    /// Whether the block carries no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Builds context blocks from short-term and long-term memory.
///
/// Read-only with respect to the store.
pub struct MemoryContextBuilder {
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
}

impl MemoryContextBuilder {
    /// Create a builder; fails if `config` does not validate.
    pub fn new(store: Arc<dyn MemoryStore>, config: MemoryConfig) -> TroupeResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// The validated config.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// The store read by this builder.
    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// [`Self::build_context`] with the configured `max_items` and `min_quality`.
    pub fn build_default(&self, task_description: &str, session_id: &str) -> TroupeResult<ContextBlock> {
        self.build_context(
            task_description,
            session_id,
            self.config.max_items,
            self.config.min_quality,
        )
    }

    /// Assemble the context block for a task.
    ///
    /// Recent short-term items come first (newest first), followed by
    /// long-term items by relevance. Every returned item has
    /// `quality_score >= min_quality`; long-term items duplicating an earlier
    /// item are dropped.
    pub fn build_context(
        &self,
        task_description: &str,
        session_id: &str,
        max_items: usize,
        min_quality: f32,
    ) -> TroupeResult<ContextBlock> {
        if max_items == 0 {
            return Ok(ContextBlock::empty());
        }

        let short_term = self
            .store
            .recent(session_id, self.config.short_term_limit.min(max_items))?;
        let long_term = self
            .store
            .query(session_id, task_description, max_items.saturating_mul(3), min_quality)?;

        let mut selected: Vec<MemoryItem> = Vec::new();
        let mut seen: Vec<(String, HashSet<String>)> = Vec::new();

        for item in short_term.into_iter().chain(long_term) {
            if selected.len() >= max_items {
                break;
            }
            if item.quality_score < min_quality {
                continue;
            }
            let key = normalize(&item.text);
            let tokens: HashSet<String> = tokenize(&item.text).into_iter().collect();
            let duplicate = item.tier == MemoryTier::LongTerm
                && seen
                    .iter()
                    .any(|(k, t)| *k == key || jaccard(t, &tokens) >= self.config.dedup_threshold);
            if duplicate {
                continue;
            }
            seen.push((key, tokens));
            selected.push(item);
        }

        if selected.is_empty() {
            tracing::debug!(session_id, "No memory qualified for context");
            return Ok(ContextBlock::empty());
        }

        Ok(self.render(selected))
    }

    fn render(&self, candidates: Vec<MemoryItem>) -> ContextBlock {
        let budget = self.config.max_chars;
        let mut text = String::new();
        let mut items = Vec::new();
        let mut current_tier: Option<MemoryTier> = None;

        for item in candidates {
            let heading = if current_tier != Some(item.tier) {
                match item.tier {
                    MemoryTier::ShortTerm => "Recent context:\n",
                    MemoryTier::LongTerm => "Relevant memories:\n",
                }
            } else {
                ""
            };
            let line = format!("{heading}- {}\n", item.text.trim());
            let used = text.chars().count();
            let line_len = line.chars().count();

            if used + line_len <= budget {
                text.push_str(&line);
                current_tier = Some(item.tier);
                items.push(item);
                continue;
            }

            // Fit a truncated final line if there is room for something useful.
            let room = budget.saturating_sub(used);
            let prefix_len = heading.chars().count() + 2;
            if room > prefix_len + 1 {
                let clipped: String = line.chars().take(room - 1).collect();
                text.push_str(&clipped);
                text.push('…');
                items.push(item);
            }
            break;
        }

        if items.is_empty() {
            return ContextBlock::empty();
        }

        ContextBlock {
            status: ContextStatus::Populated,
            items,
            text: text.trim_end().to_string(),
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}
