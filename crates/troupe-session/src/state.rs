use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use troupe_core::{TroupeError, TroupeResult};

/// Key/value store scoped to a single run.
///
/// Every mutation takes one store-wide lock, so read-modify-write operations
/// such as [`StateStore::increment`] never interleave even when tasks complete
/// concurrently. No method awaits.
pub struct StateStore {
    run_id: String,
    values: Mutex<BTreeMap<String, Value>>,
}

impl StateStore {
    /// Empty state for `run_id`.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            values: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a store pre-populated from a snapshot map.
    pub fn with_values(run_id: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            run_id: run_id.into(),
            values: Mutex::new(values),
        }
    }

    /// The owning run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Get a value deserialized into `T`. Missing keys yield `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> TroupeResult<Option<T>> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| TroupeError::State(format!("key '{key}' has unexpected type: {e}"))),
            None => Ok(None),
        }
    }

    /// Set a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> TroupeResult<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.values.lock().insert(key.into(), value))
    }

    /// Add `delta` to an integer value. A missing key starts at zero.
    pub fn increment(&self, key: &str, delta: i64) -> TroupeResult<i64> {
        let mut values = self.values.lock();
        let current = match values.get(key) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                TroupeError::State(format!("cannot increment '{key}': {value} is not an integer"))
            })?,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            TroupeError::State(format!("increment of '{key}' overflows"))
        })?;
        values.insert(key.to_string(), Value::from(next));
        Ok(next)
    }

    /// Push a value onto an array. A missing key becomes a one-element array.
    /// Returns the new length.
    pub fn append(&self, key: &str, item: impl Serialize) -> TroupeResult<usize> {
        let item = serde_json::to_value(item)?;
        let mut values = self.values.lock();
        match values.get_mut(key) {
            None => {
                values.insert(key.to_string(), Value::Array(vec![item]));
                Ok(1)
            }
            Some(Value::Array(items)) => {
                items.push(item);
                Ok(items.len())
            }
            Some(other) => Err(TroupeError::State(format!(
                "cannot append to '{key}': {other} is not an array"
            ))),
        }
    }

    /// Remove `key`, returning its value.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.values.lock().remove(key)
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Atomically replace a value with `f(current)`.
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut values = self.values.lock();
        let next = f(values.get(key));
        values.insert(key.to_string(), next.clone());
        next
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Whether no key is set.
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Copy of the full contents, in key order.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.lock().clone()
    }

    /// Replace the full contents.
    pub fn restore(&self, values: BTreeMap<String, Value>) {
        *self.values.lock() = values;
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("run_id", &self.run_id)
            .field("keys", &self.len())
            .finish()
    }
}
