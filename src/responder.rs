//! Natural-language query answering.
//!
//! The responder walks a fixed chain and stops at the first step that
//! produces an answer:
//!
//! ```text
//! query ──▶ TID detected? ──yes──▶ exact TID lookup ──hit──▶ shaped answer
//!               │                        │
//!               no                      miss
//!               ▼                        ▼
//!          fuzzy multi-field search ──hit──▶ combined sentence
//!               │
//!              miss
//!               ▼
//!          generative completion (errors become text)
//! ```
//!
//! In [`ResponderMode::Strict`] only the TID lookup runs; a missing TID or a
//! miss produces a fixed message instead of falling through.
//!
//! Store failures on this path are logged and treated as "no hits" so the
//! caller always gets a textual answer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ResponderConfig, ResponderMode, TidStrategy};
use crate::generative::TextGenerator;
use crate::models::{ProductField, ProductHit, ProductRecord};
use crate::store::ProductStore;

pub const MISSING_TID_MESSAGE: &str =
    "Please include a TID in your query so I can look up the product.";

/// Which step of the chain produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    ExactMatch,
    FuzzyMatch,
    Generated,
    NoMatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

impl Answer {
    fn new(text: String, source: AnswerSource) -> Self {
        Self { text, source }
    }
}

/// A keyword-routed answer format for TID hits.
struct ResponseShape {
    keywords: &'static [&'static str],
    render: fn(&ProductRecord) -> String,
}

/// Checked in order against the lowercased query; first match wins.
const KEYWORD_SHAPES: &[ResponseShape] = &[
    ResponseShape {
        keywords: &["price"],
        render: |p| format!("The price of TID {} is ${}.", p.tid, p.price_retail),
    },
    ResponseShape {
        keywords: &["product", "name"],
        render: |p| format!("The product name of TID {} is {}.", p.tid, p.product_name),
    },
    ResponseShape {
        keywords: &["url"],
        render: |p| {
            format!(
                "The URL for the product with TID {} is {}.",
                p.tid,
                p.url_or_empty()
            )
        },
    },
];

/// Default sentence for a TID hit with no keyword, and for fuzzy hits.
pub fn combined_sentence(p: &ProductRecord) -> String {
    format!(
        "The product {} (TID {}) is priced at ${}. You can find more details here: {}.",
        p.product_name,
        p.tid,
        p.price_retail,
        p.url_or_empty()
    )
}

/// Render a TID hit according to the keywords in `query_lower`.
pub fn shape_response(query_lower: &str, record: &ProductRecord) -> String {
    KEYWORD_SHAPES
        .iter()
        .find(|shape| shape.keywords.iter().any(|k| query_lower.contains(k)))
        .map(|shape| (shape.render)(record))
        .unwrap_or_else(|| combined_sentence(record))
}

/// Pull a candidate TID out of a query that mentions "tid".
///
/// With [`TidStrategy::AllDigits`] every digit in the query is concatenated,
/// so `"tid 12 or tid 34"` yields `"1234"`. [`TidStrategy::FirstNumber`]
/// takes only the first digit run after the first "tid".
pub fn extract_tid(query: &str, strategy: TidStrategy) -> Option<String> {
    let lower = query.to_lowercase();
    let keyword_at = lower.find("tid")?;

    let tid: String = match strategy {
        TidStrategy::AllDigits => query.chars().filter(|c| c.is_ascii_digit()).collect(),
        TidStrategy::FirstNumber => lower[keyword_at + "tid".len()..]
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect(),
    };

    (!tid.is_empty()).then_some(tid)
}

pub fn professional_prompt(query: &str) -> String {
    format!("Reply in a professional manner: {}", query)
}

pub struct Responder {
    store: Arc<dyn ProductStore>,
    generator: Arc<dyn TextGenerator>,
    settings: ResponderConfig,
    fuzzy_limit: usize,
}

impl Responder {
    pub fn new(
        store: Arc<dyn ProductStore>,
        generator: Arc<dyn TextGenerator>,
        settings: ResponderConfig,
        fuzzy_limit: usize,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
            fuzzy_limit,
        }
    }

    pub async fn answer(&self, query: &str) -> Answer {
        let tid = extract_tid(query, self.settings.tid_strategy);
        debug!(query, tid = ?tid, mode = ?self.settings.mode, "answering query");

        match self.settings.mode {
            ResponderMode::Strict => self.answer_strict(tid).await,
            ResponderMode::Fallback => self.answer_with_fallbacks(query, tid).await,
        }
    }

    async fn answer_strict(&self, tid: Option<String>) -> Answer {
        let Some(tid) = tid else {
            return Answer::new(MISSING_TID_MESSAGE.to_string(), AnswerSource::NoMatch);
        };

        match self.lookup_tid(&tid).await {
            Some(p) => Answer::new(
                format!(
                    "The price of {} with TID {} is ${}.",
                    p.product_name, p.tid, p.price_retail
                ),
                AnswerSource::ExactMatch,
            ),
            None => Answer::new(
                format!("No product found with TID {}.", tid),
                AnswerSource::NoMatch,
            ),
        }
    }

    async fn answer_with_fallbacks(&self, query: &str, tid: Option<String>) -> Answer {
        let query_lower = query.to_lowercase();

        if let Some(tid) = tid {
            if let Some(record) = self.lookup_tid(&tid).await {
                return Answer::new(
                    shape_response(&query_lower, &record),
                    AnswerSource::ExactMatch,
                );
            }
            debug!(tid, "no exact TID match, falling back to fuzzy search");
        }

        if let Some(record) = self.fuzzy_lookup(query).await {
            return Answer::new(combined_sentence(&record), AnswerSource::FuzzyMatch);
        }

        debug!("no catalog match, using generative fallback");
        let text = match self.generator.complete(&professional_prompt(query)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "generative fallback failed");
                e.to_string()
            }
        };
        Answer::new(text, AnswerSource::Generated)
    }

    async fn lookup_tid(&self, tid: &str) -> Option<ProductRecord> {
        let hits = self
            .store
            .exact_match(ProductField::Tid, tid)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, tid, "exact TID lookup failed");
                Vec::new()
            });
        first_record(hits)
    }

    async fn fuzzy_lookup(&self, query: &str) -> Option<ProductRecord> {
        let hits = self
            .store
            .fuzzy_match(&ProductField::ALL, query, self.fuzzy_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "fuzzy lookup failed");
                Vec::new()
            });
        first_record(hits)
    }
}

fn first_record(hits: Vec<ProductHit>) -> Option<ProductRecord> {
    let hit = hits.into_iter().next()?;
    debug!(id = %hit.id, score = hit.score, tid = %hit.record.tid, "catalog hit");
    Some(hit.record)
}
