//! Storage abstraction for the product catalog.
//!
//! The [`ProductStore`] trait is the only way the indexer and responder touch
//! persisted records, so alternate backends (or an upsert-by-TID strategy)
//! can be substituted without changing row processing or answer logic.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ProductField, ProductHit, ProductRecord};

/// Fixed schema of a product collection.
///
/// Text fields are always [`ProductField::ALL`]; the dense vector field is
/// present only when `vector_dims` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionSchema {
    pub vector_dims: Option<usize>,
}

impl CollectionSchema {
    pub fn text_only() -> Self {
        Self { vector_dims: None }
    }

    pub fn with_vectors(dims: usize) -> Self {
        Self {
            vector_dims: Some(dims),
        }
    }
}

/// Abstract document store holding one product collection.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection`](ProductStore::create_collection) | Create the collection with a schema |
/// | [`delete_collection`](ProductStore::delete_collection) | Drop the collection if it exists |
/// | [`replace_all`](ProductStore::replace_all) | Drop and recreate: the destructive reset used by uploads |
/// | [`index_document`](ProductStore::index_document) | Write one record |
/// | [`exact_match`](ProductStore::exact_match) | Equality lookup on one field |
/// | [`fuzzy_match`](ProductStore::fuzzy_match) | Approximate multi-field text search |
/// | [`count`](ProductStore::count) | Number of stored records |
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Create the collection. Fails if it already exists.
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Drop the collection and every record in it. A missing collection is
    /// not an error.
    async fn delete_collection(&self) -> Result<()>;

    /// Destroy all records and recreate the collection with `schema`.
    async fn replace_all(&self, schema: &CollectionSchema) -> Result<()> {
        self.delete_collection().await?;
        self.create_collection(schema).await
    }

    /// Write one record, returning its store-assigned id.
    async fn index_document(&self, record: &ProductRecord) -> Result<String>;

    /// Records whose `field` equals `value` exactly, in insertion order.
    async fn exact_match(&self, field: ProductField, value: &str) -> Result<Vec<ProductHit>>;

    /// Records matching any term of `text` in any of `fields`, allowing
    /// automatic fuzziness per term. Best match first.
    async fn fuzzy_match(
        &self,
        fields: &[ProductField],
        text: &str,
        limit: usize,
    ) -> Result<Vec<ProductHit>>;

    /// Number of records; `0` when the collection does not exist.
    async fn count(&self) -> Result<u64>;
}
