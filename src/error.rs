//! Errors surfaced by the catalog indexer.
//!
//! Query answering has no error type of its own: every failure on that path
//! is absorbed into the textual answer.

/// Why an upload could not be indexed.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The caller sent something unusable: no file, wrong extension, bad CSV.
    #[error("{0}")]
    InvalidInput(String),
    /// The store or the embedding service failed mid-upload. Rows written
    /// before the failure stay in the collection.
    #[error("{0:#}")]
    UpstreamUnavailable(#[source] anyhow::Error),
}

impl CatalogError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CatalogError::InvalidInput(message.into())
    }
}
