//! Ranking, ingestion and refresh scheduling over a [`CatalogStore`].
//!
//! [`CatalogStore`]: vinorank_core::CatalogStore

mod ingest;
mod ranking;
mod refresh;
mod service;

pub use ingest::IngestionPipeline;
pub use ranking::RankingEngine;
pub use refresh::{RefreshOutcome, RefreshScheduler};
pub use service::Catalog;
