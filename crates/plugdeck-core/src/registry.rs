use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

/// Shared registry of defined custom-element tag names.
///
/// Plugins populate it as a side effect of executing their script resources;
/// the host only reads it (polled by the element gate). Registration is
/// global and idempotent.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, tag: impl Into<String>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into());
    }

    pub fn is_defined(&self, tag: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(tag)
    }
}
