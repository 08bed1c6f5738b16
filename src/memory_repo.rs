use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    short_code::ShortCode,
    url_repo::{InsertUrlError, NewUrlMapping, UrlMapping, UrlRepository},
};

/// [`UrlRepository`] backed by a [`DashMap`], for tests and local runs.
///
/// Inserts check and claim a short code under the same shard lock, so two
/// racing inserts of one code behave like a unique constraint: exactly one wins.
#[derive(Debug)]
pub struct InMemoryUrlRepository {
    mappings: DashMap<ShortCode, UrlMapping>,
    next_id: AtomicI64,
}

impl InMemoryUrlRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mappings: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Snapshot of every stored mapping, in no particular order.
    #[must_use]
    pub fn mappings(&self) -> Vec<UrlMapping> {
        self.mappings.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for InMemoryUrlRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlRepository for InMemoryUrlRepository {
    async fn find_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlMapping>> {
        Ok(self.mappings.get(code).map(|entry| entry.value().clone()))
    }

    async fn exists(&self, code: &ShortCode) -> anyhow::Result<bool> {
        Ok(self.mappings.contains_key(code))
    }

    async fn insert(&self, mapping: NewUrlMapping) -> Result<UrlMapping, InsertUrlError> {
        match self.mappings.entry(mapping.short_code.clone()) {
            Entry::Occupied(_) => Err(InsertUrlError::DuplicateCode(mapping.short_code)),
            Entry::Vacant(vacant) => {
                let stored = UrlMapping {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    original_url: mapping.original_url,
                    short_code: mapping.short_code,
                    created_at: mapping.created_at,
                    hit_count: 0,
                };
                vacant.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn increment_hit_count(&self, code: &ShortCode) -> anyhow::Result<()> {
        let mut entry = self
            .mappings
            .get_mut(code)
            .ok_or_else(|| anyhow!("No URL mapping found for short code {code}"))?;
        entry.hit_count += 1;
        Ok(())
    }
}
