// ruleflow-core/src/runtime/storage.rs
// ============================================================================
// Module: Ruleflow In-Memory Storage
// Description: Simple in-memory storage adapter for tests and defaults.
// Purpose: Provide a deterministic adapter implementation without external deps.
// Dependencies: crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of
//! [`StorageAdapter`] for tests and local demos. It is not intended for
//! production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::interfaces::StorageAdapter;
use crate::interfaces::StorageError;

// ============================================================================
// SECTION: In-Memory Adapter
// ============================================================================

/// In-memory storage adapter for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorageAdapter {
    /// State map protected by a mutex.
    states: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryStorageAdapter {
    /// Creates a new in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl StorageAdapter for MemoryStorageAdapter {
    fn save(&self, key: &str, state: &Value) -> Result<(), StorageError> {
        self.states
            .lock()
            .map_err(|_| StorageError::Unavailable("storage mutex poisoned".to_string()))?
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let guard = self
            .states
            .lock()
            .map_err(|_| StorageError::Unavailable("storage mutex poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.states
            .lock()
            .map_err(|_| StorageError::Unavailable("storage mutex poisoned".to_string()))?
            .remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let guard = self
            .states
            .lock()
            .map_err(|_| StorageError::Unavailable("storage mutex poisoned".to_string()))?;
        Ok(guard
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
