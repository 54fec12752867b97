//! In-memory [`ProductStore`] implementation for tests and throwaway runs.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Fuzzy search scores a
//! record by how many query terms fuzzily match a term of any searched field.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::fuzzy::{is_fuzzy_match, tokenize};
use crate::models::{ProductField, ProductHit, ProductRecord};

use super::{CollectionSchema, ProductStore};

struct Collection {
    schema: CollectionSchema,
    records: Vec<(String, ProductRecord)>,
}

/// In-memory store. `None` means the collection has not been created.
pub struct InMemoryStore {
    collection: RwLock<Option<Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collection: RwLock::new(None),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Option<Collection>>> {
        self.collection
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Option<Collection>>> {
        self.collection
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn hit(id: &str, score: f64, record: &ProductRecord) -> ProductHit {
    ProductHit {
        id: id.to_string(),
        score,
        record: record.clone(),
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut guard = self.write()?;
        if guard.is_some() {
            bail!("collection already exists");
        }
        *guard = Some(Collection {
            schema: *schema,
            records: Vec::new(),
        });
        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        *self.write()? = None;
        Ok(())
    }

    async fn index_document(&self, record: &ProductRecord) -> Result<String> {
        let mut guard = self.write()?;
        let collection = guard
            .as_mut()
            .ok_or_else(|| anyhow!("collection does not exist"))?;

        match (&record.embedding, collection.schema.vector_dims) {
            (Some(_), None) => bail!("collection has no vector field"),
            (Some(v), Some(dims)) if v.len() != dims => {
                bail!("embedding has {} dims, collection expects {}", v.len(), dims)
            }
            _ => {}
        }

        let id = Uuid::new_v4().to_string();
        collection.records.push((id.clone(), record.clone()));
        Ok(id)
    }

    async fn exact_match(&self, field: ProductField, value: &str) -> Result<Vec<ProductHit>> {
        let guard = self.read()?;
        let collection = guard
            .as_ref()
            .ok_or_else(|| anyhow!("collection does not exist"))?;

        Ok(collection
            .records
            .iter()
            .filter(|(_, r)| field.value(r) == Some(value))
            .map(|(id, r)| hit(id, 1.0, r))
            .collect())
    }

    async fn fuzzy_match(
        &self,
        fields: &[ProductField],
        text: &str,
        limit: usize,
    ) -> Result<Vec<ProductHit>> {
        let guard = self.read()?;
        let collection = guard
            .as_ref()
            .ok_or_else(|| anyhow!("collection does not exist"))?;

        let query_terms = tokenize(text);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<ProductHit> = collection
            .records
            .iter()
            .filter_map(|(id, record)| {
                let doc_terms: Vec<String> = fields
                    .iter()
                    .filter_map(|f| f.value(record))
                    .flat_map(tokenize)
                    .collect();
                let matched = query_terms
                    .iter()
                    .filter(|q| doc_terms.iter().any(|t| is_fuzzy_match(q, t)))
                    .count();
                (matched > 0).then(|| hit(id, matched as f64, record))
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self
            .read()?
            .as_ref()
            .map(|c| c.records.len() as u64)
            .unwrap_or(0))
    }
}
