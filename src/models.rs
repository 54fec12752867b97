//! Core data models used throughout the catalog service.
//!
//! A [`ProductRecord`] is the only persisted entity. [`CatalogRow`] is the
//! shape a CSV row is decoded into before it becomes a record.

use serde::Deserialize;

/// One row of an uploaded catalog, keyed by the CSV header names.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRow {
    #[serde(rename = "PRODUCT_NAME")]
    pub product_name: String,
    pub tid: String,
    #[serde(rename = "PRICE_RETAIL")]
    pub price_retail: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A product document as written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub product_name: String,
    pub tid: String,
    pub price_retail: String,
    pub url: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl ProductRecord {
    /// The text that gets embedded when embeddings are enabled.
    pub fn description(&self) -> String {
        format!(
            "Product: {}, Price: {}, TID: {}",
            self.product_name, self.price_retail, self.tid
        )
    }

    /// URL for display; an absent URL renders as an empty string.
    pub fn url_or_empty(&self) -> &str {
        self.url.as_deref().unwrap_or("")
    }
}

impl From<CatalogRow> for ProductRecord {
    fn from(row: CatalogRow) -> Self {
        Self {
            product_name: row.product_name,
            tid: row.tid,
            price_retail: row.price_retail,
            url: row.url.filter(|u| !u.is_empty()),
            embedding: None,
        }
    }
}

/// Searchable text fields of a product document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductField {
    ProductName,
    Tid,
    PriceRetail,
    Url,
}

impl ProductField {
    pub const ALL: [ProductField; 4] = [
        ProductField::ProductName,
        ProductField::Tid,
        ProductField::PriceRetail,
        ProductField::Url,
    ];

    /// Column name used by SQL-backed stores.
    pub fn column(self) -> &'static str {
        match self {
            ProductField::ProductName => "product_name",
            ProductField::Tid => "tid",
            ProductField::PriceRetail => "price_retail",
            ProductField::Url => "url",
        }
    }

    pub fn value(self, record: &ProductRecord) -> Option<&str> {
        match self {
            ProductField::ProductName => Some(&record.product_name),
            ProductField::Tid => Some(&record.tid),
            ProductField::PriceRetail => Some(&record.price_retail),
            ProductField::Url => record.url.as_deref(),
        }
    }
}

/// A search hit: store-assigned id, backend score and the stored record.
#[derive(Debug, Clone)]
pub struct ProductHit {
    pub id: String,
    pub score: f64,
    pub record: ProductRecord,
}
