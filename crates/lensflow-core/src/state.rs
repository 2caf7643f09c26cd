//! Shared state and run parameters.
//!
//! [`SharedState`] is the single mutable bag threaded through a whole flow run.
//! It has no schema: producers and consumers agree on keys by convention, and
//! the typed accessors turn a missing or malformed entry into a descriptive
//! [`FlowError`] instead of a panic at the call site.
//!
//! The internal lock only makes each accessor call memory-safe. It gives no
//! isolation across phases: nodes running concurrently (parallel batches or
//! parallel batch flows) must not mutate overlapping keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, FlowResult};

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> FlowResult<T> {
    serde_json::from_value(value).map_err(|e| FlowError::TypeMismatch {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn encode<T: Serialize>(value: T) -> FlowResult<Value> {
    serde_json::to_value(value).map_err(FlowError::from)
}

/// Key/value context shared by every node of a flow run.
#[derive(Default)]
pub struct SharedState {
    values: RwLock<HashMap<String, Value>>,
}

impl SharedState {
    /// Create an empty shared state
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> FlowResult<()> {
        let value = encode(value)?;
        self.write().insert(key.into(), value);
        Ok(())
    }

    /// Store an already-built JSON value under `key`.
    pub fn insert_value(&self, key: impl Into<String>, value: Value) {
        self.write().insert(key.into(), value);
    }

    /// Read `key` as `T`. Absent and `null` entries both read as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> FlowResult<Option<T>> {
        match self.get_value(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(key, value).map(Some),
        }
    }

    /// Read a key that an earlier node must have produced.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> FlowResult<T> {
        self.get(key)?
            .ok_or_else(|| FlowError::MissingKey(key.to_string()))
    }

    /// Read `key`, falling back to `default` when it is absent or null.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> FlowResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Read `key`, falling back to `T::default()` when it is absent or null.
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> FlowResult<T> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    /// Raw JSON value stored under `key`
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Append `item` to the array stored under `key`, creating the array
    /// when the key is absent or null.
    pub fn push<T: Serialize>(&self, key: &str, item: T) -> FlowResult<()> {
        let item = encode(item)?;
        let mut values = self.write();
        match values.get_mut(key) {
            Some(Value::Array(items)) => items.push(item),
            None | Some(Value::Null) => {
                values.insert(key.to_string(), Value::Array(vec![item]));
            }
            Some(other) => {
                return Err(FlowError::TypeMismatch {
                    key: key.to_string(),
                    message: format!("expected an array, found {}", other),
                })
            }
        }
        Ok(())
    }

    /// Read-modify-write a single key while holding the lock.
    ///
    /// `f` receives the current value (or `None`) and returns the new one.
    ///
    /// The write lock is held while `f` runs, so `f` must not touch this
    /// `SharedState` itself: any read or write from inside `f` deadlocks.
    pub fn update<T, F>(&self, key: &str, f: F) -> FlowResult<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let mut values = self.write();
        let current = match values.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(decode(key, value.clone())?),
        };
        let next = encode(f(current))?;
        values.insert(key.to_string(), next);
        Ok(())
    }

    /// Whether `key` holds a value (including `null`)
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Remove `key`, returning the previous raw value
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Sorted list of keys currently stored
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the whole state as a JSON object
    pub fn snapshot(&self) -> Value {
        let map: Map<String, Value> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("keys", &self.keys())
            .finish()
    }
}

impl From<HashMap<String, Value>> for SharedState {
    fn from(values: HashMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }
}

impl FromIterator<(String, Value)> for SharedState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<HashMap<_, _>>())
    }
}

/// Flow-scoped parameters handed to a node right before it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Read parameter `key` as `T`; absent and `null` read as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> FlowResult<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(key, value.clone()).map(Some),
        }
    }

    pub fn require<T: DeserializeOwned>(&self, key: &str) -> FlowResult<T> {
        self.get(key)?
            .ok_or_else(|| FlowError::MissingParam(key.to_string()))
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> FlowResult<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// `self` overlaid with `overlay`; keys in `overlay` win.
    pub fn merged(&self, overlay: &Params) -> Params {
        let mut merged = self.0.clone();
        for (key, value) in &overlay.0 {
            merged.insert(key.clone(), value.clone());
        }
        Params(merged)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
