//! Content lookup seam.

use dashmap::DashMap;

use crate::access::types::ContentItem;
use crate::error::{EngineError, EngineResult};

/// Read access to content items owned by an external content store.
pub trait ContentDirectory: Send + Sync {
    fn content_item(&self, id: &str) -> EngineResult<Option<ContentItem>>;
}

/// Content registry fed through the admin API.
#[derive(Debug, Default)]
pub struct InMemoryContent {
    items: DashMap<String, ContentItem>,
}

impl InMemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an item.
    pub fn upsert(&self, item: ContentItem) -> EngineResult<()> {
        if item.id.trim().is_empty() || item.creator_id.trim().is_empty() {
            return Err(EngineError::validation("content id and creator id are required"));
        }
        tracing::debug!(content_item = %item.id, creator = %item.creator_id, "Content registered");
        self.items.insert(item.id.clone(), item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ContentItem> {
        self.items.iter().map(|i| i.value().clone()).collect()
    }

    pub fn restore(&self, items: Vec<ContentItem>) {
        for item in items {
            self.items.insert(item.id.clone(), item);
        }
    }
}

impl ContentDirectory for InMemoryContent {
    fn content_item(&self, id: &str) -> EngineResult<Option<ContentItem>> {
        Ok(self.items.get(id).map(|i| i.value().clone()))
    }
}
