use time::OffsetDateTime;
use tracing::{debug, info, warn};
use vinorank_core::{
    CatalogError, CatalogStore, ImportRecord, IngestReport, RejectedRecord, WineUpsert,
};

/// Normalizes raw import records and merges them into the store in one
/// atomic batch.
pub struct IngestionPipeline<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> IngestionPipeline<'a> {
    #[must_use]
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Rows that cannot be normalized are skipped and reported; the rest are
    /// upserted and `now` becomes the new refresh stamp.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] when a non-empty batch has no
    /// usable row, and propagates store failures. Nothing is written on
    /// error.
    pub fn ingest(
        &self,
        records: &[ImportRecord],
        now: OffsetDateTime,
    ) -> Result<IngestReport, CatalogError> {
        let Some(batch) = normalize_batch(records)? else {
            return Ok(empty_report());
        };
        let upserted_count = self.store.upsert_wines(&batch.accepted, now)?;
        Ok(finish(upserted_count, batch.rejected, now))
    }

    /// Like [`Self::ingest`], but commits only while the stored refresh stamp
    /// still equals `observed`. `None` means another writer refreshed first
    /// and nothing was written.
    ///
    /// # Errors
    /// See [`Self::ingest`].
    pub fn ingest_if_stamp(
        &self,
        records: &[ImportRecord],
        now: OffsetDateTime,
        observed: Option<OffsetDateTime>,
    ) -> Result<Option<IngestReport>, CatalogError> {
        let Some(batch) = normalize_batch(records)? else {
            return Ok(Some(empty_report()));
        };
        match self.store.upsert_wines_if_stamp(&batch.accepted, now, observed)? {
            Some(upserted_count) => Ok(Some(finish(upserted_count, batch.rejected, now))),
            None => {
                info!("refresh stamp moved during ingestion; batch discarded");
                Ok(None)
            }
        }
    }
}

fn empty_report() -> IngestReport {
    IngestReport {
        upserted_count: 0,
        rejected: Vec::new(),
        refreshed_at: None,
    }
}

struct NormalizedBatch {
    accepted: Vec<WineUpsert>,
    rejected: Vec<RejectedRecord>,
}

/// `None` for an empty batch.
fn normalize_batch(records: &[ImportRecord]) -> Result<Option<NormalizedBatch>, CatalogError> {
    if records.is_empty() {
        debug!("empty import batch; nothing to ingest");
        return Ok(None);
    }

    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match record.normalize() {
            Ok(upsert) => accepted.push(upsert),
            Err(err) => {
                warn!(index, reason = %err, "skipping import record");
                rejected.push(RejectedRecord {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    if accepted.is_empty() {
        return Err(CatalogError::Validation(format!(
            "none of the {} import records could be normalized",
            records.len()
        )));
    }
    Ok(Some(NormalizedBatch { accepted, rejected }))
}

fn finish(upserted_count: usize, rejected: Vec<RejectedRecord>, now: OffsetDateTime) -> IngestReport {
    info!(
        upserted = upserted_count,
        rejected = rejected.len(),
        "ingested wine batch"
    );
    IngestReport {
        upserted_count,
        rejected,
        refreshed_at: Some(now),
    }
}
