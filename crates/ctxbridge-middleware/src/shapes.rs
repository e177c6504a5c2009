//! Per-type shape cache.
//!
//! A topic keeps one type for the lifetime of the process, so a shape is
//! resolved once and then shared read-only.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use ctxbridge_types::{BridgeError, MessageShape, TypeResolver};
use tracing::debug;

pub struct ShapeRegistry {
    resolver: Arc<dyn TypeResolver>,
    cache: RwLock<HashMap<String, Arc<MessageShape>>>,
}

impl ShapeRegistry {
    pub fn new(resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Shape of `type_name`, resolving it on first request.
    pub fn get(&self, type_name: &str) -> Result<Arc<MessageShape>, BridgeError> {
        if let Some(shape) = self.cached(type_name) {
            return Ok(shape);
        }
        let shape = Arc::new(self.resolver.resolve(type_name)?);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race; keep the first shape.
        let shape = cache.entry(type_name.to_string()).or_insert(shape).clone();
        debug!(type_name = %type_name, fields = shape.fields.len(), "message shape cached");
        Ok(shape)
    }

    pub fn cached(&self, type_name: &str) -> Option<Arc<MessageShape>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
