//! # Product RAG
//!
//! An HTTP service that indexes a CSV product catalog into a full-text store
//! and answers natural-language questions about it, falling back to a
//! generative-language API when the catalog has no match.
//!
//! ## Architecture
//!
//! ```text
//!  POST /upload_csv            POST /ask_query
//!        │                           │
//!        ▼                           ▼
//! ┌──────────────┐           ┌──────────────┐    ┌────────────┐
//! │   Catalog    │           │    Query     │───▶│ Generative │
//! │   Indexer    │           │  Responder   │    │    API     │
//! └──────┬───────┘           └──────┬───────┘    └────────────┘
//!        │  replace_all + index     │  exact / fuzzy
//!        ▼                          ▼
//!     ┌────────────────────────────────┐
//!     │   ProductStore (SQLite FTS5)   │
//!     └────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! prag serve                              # start the HTTP server
//! prag index ./products.csv               # index from the command line
//! prag ask "What is the price of TID 1023?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`models`] | Product record and CSV row types |
//! | [`catalog`] | CSV decoding and indexing |
//! | [`responder`] | TID lookup, fuzzy and generative fallbacks |
//! | [`store`] | Store trait, SQLite and in-memory backends |
//! | [`fuzzy`] | Term tokenization and edit-distance matching |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generative`] | Generative-text clients |
//! | [`server`] | HTTP routes |
//! | [`db`] | Database connection |

pub mod catalog;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fuzzy;
pub mod generative;
pub mod models;
pub mod responder;
pub mod server;
pub mod store;
