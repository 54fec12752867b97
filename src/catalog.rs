//! Catalog indexing.
//!
//! Turns an uploaded CSV into product documents:
//!
//! 1. Check the upload name ends in `.csv`.
//! 2. Decode the whole file (UTF-8, header row with `PRODUCT_NAME`, `tid`,
//!    `PRICE_RETAIL`, optional `url`) into records.
//! 3. Reset the collection through [`ProductStore::replace_all`].
//! 4. Write each record with its own store call, embedding it first when an
//!    [`Embedder`] is configured.
//!
//! Decoding happens before the reset, so a malformed upload leaves the
//! existing catalog untouched. Steps 3–4 are not transactional.

use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::Embedder;
use crate::error::CatalogError;
use crate::models::{CatalogRow, ProductRecord};
use crate::store::{CollectionSchema, ProductStore};

pub const UNSUPPORTED_FILE_TYPE: &str = "File type not supported. Please upload a CSV file.";

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub documents_written: usize,
    pub embedded: bool,
}

pub struct CatalogIndexer {
    store: Arc<dyn ProductStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl CatalogIndexer {
    pub fn new(store: Arc<dyn ProductStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { store, embedder }
    }

    pub fn schema(&self) -> CollectionSchema {
        match &self.embedder {
            Some(e) => CollectionSchema::with_vectors(e.dims()),
            None => CollectionSchema::text_only(),
        }
    }

    /// Validate, decode, and index an uploaded catalog file.
    pub async fn index_catalog(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<IndexReport, CatalogError> {
        validate_file_name(file_name)?;
        let records = parse_catalog(bytes)?;
        debug!(file = file_name, rows = records.len(), "decoded catalog");

        self.store
            .replace_all(&self.schema())
            .await
            .map_err(CatalogError::UpstreamUnavailable)?;

        for mut record in records.iter().cloned() {
            if let Some(embedder) = &self.embedder {
                let vector = embedder
                    .embed(&record.description())
                    .await
                    .map_err(CatalogError::UpstreamUnavailable)?;
                record.embedding = Some(vector);
            }
            self.store
                .index_document(&record)
                .await
                .map_err(CatalogError::UpstreamUnavailable)?;
        }

        info!(
            file = file_name,
            documents = records.len(),
            embedding_model = ?self.embedder.as_ref().map(|e| e.model_name()),
            "catalog indexed"
        );

        Ok(IndexReport {
            documents_written: records.len(),
            embedded: self.embedder.is_some(),
        })
    }
}

/// Accepts only non-empty names ending in `.csv`.
pub fn validate_file_name(file_name: &str) -> Result<(), CatalogError> {
    if file_name.is_empty() {
        return Err(CatalogError::invalid("No selected file"));
    }
    if !file_name.ends_with(".csv") {
        return Err(CatalogError::invalid(UNSUPPORTED_FILE_TYPE));
    }
    Ok(())
}

/// Decode CSV bytes into product records.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<ProductRecord>, CatalogError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CatalogError::invalid(format!("CSV file is not valid UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(CatalogError::invalid("CSV file is empty."));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| CatalogError::invalid(format!("Could not read CSV header: {}", e)))?
        .clone();
    for required in ["PRODUCT_NAME", "tid", "PRICE_RETAIL"] {
        if !headers.iter().any(|h| h == required) {
            return Err(CatalogError::invalid(format!(
                "CSV is missing required column: {}",
                required
            )));
        }
    }

    reader
        .deserialize::<CatalogRow>()
        .enumerate()
        .map(|(i, row)| {
            row.map(ProductRecord::from).map_err(|e| {
                // Row numbers are 1-based and skip the header line.
                CatalogError::invalid(format!("Malformed CSV row {}: {}", i + 1, e))
            })
        })
        .collect()
}
