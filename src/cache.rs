//! Process-wide memoization of loaded datasets, keyed by source locator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::PipelineResult;

/// Caches one value per locator for the lifetime of the process.
///
/// Readers share the map through a read lock. A miss takes the load lock so
/// that concurrent first accesses to the same locator load it only once.
/// Failed loads are not cached: a later call tries again.
pub struct DatasetCache<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
    load_lock: Mutex<()>,
}

impl<T> Default for DatasetCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }
}

impl<T> DatasetCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, locator: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .cloned()
    }

    pub fn get_or_try_load<F>(&self, locator: &str, load: F) -> PipelineResult<Arc<T>>
    where
        F: FnOnce() -> PipelineResult<T>,
    {
        if let Some(hit) = self.get(locator) {
            return Ok(hit);
        }

        let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished the same load while we waited.
        if let Some(hit) = self.get(locator) {
            return Ok(hit);
        }

        let value = Arc::new(load()?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.to_string(), Arc::clone(&value));
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
