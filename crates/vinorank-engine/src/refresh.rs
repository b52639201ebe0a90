use std::sync::{Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tracing::{debug, info};
use vinorank_core::{
    evaluate_refresh, CatalogError, CatalogStore, ImportRecord, IngestReport, RefreshDecision,
    RefreshPolicy, RefreshStatus, SourceFeed,
};

use crate::ingest::IngestionPipeline;

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The catalog is fresher than the threshold.
    Skipped {
        days_since: f64,
        next_due_at: OffsetDateTime,
    },
    /// The feed had nothing to offer; the refresh stamp is unchanged.
    NoData,
    /// Another writer, possibly another process, refreshed the catalog
    /// between the due decision and the commit. Nothing was written.
    Superseded,
    Refreshed(IngestReport),
}

/// Staleness-driven refresh with a single-flight guard.
///
/// The guard is held from the due decision through the fetch and the
/// ingestion, so overlapping checks on one scheduler ingest at most once.
/// Across processes the store re-checks the observed refresh stamp inside
/// the batch transaction, so a stale decision never commits.
pub struct RefreshScheduler {
    policy: RefreshPolicy,
    guard: Mutex<()>,
}

impl RefreshScheduler {
    /// # Errors
    /// Returns [`CatalogError::Configuration`] for an invalid policy.
    pub fn new(policy: RefreshPolicy) -> Result<Self, CatalogError> {
        policy.validate()?;
        Ok(Self {
            policy,
            guard: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// # Errors
    /// Propagates store failures.
    pub fn status(
        &self,
        store: &dyn CatalogStore,
        now: OffsetDateTime,
    ) -> Result<RefreshStatus, CatalogError> {
        let meta = store.get_refresh_meta()?;
        Ok(RefreshStatus::evaluate(&meta, now, &self.policy))
    }

    /// # Errors
    /// Propagates feed, validation and store failures.
    pub fn check_and_maybe_refresh(
        &self,
        store: &dyn CatalogStore,
        now: OffsetDateTime,
        feed: &dyn SourceFeed,
    ) -> Result<RefreshOutcome, CatalogError> {
        let _flight = self.enter();

        let meta = store.get_refresh_meta()?;
        match evaluate_refresh(meta.last_refresh_at, now, &self.policy) {
            RefreshDecision::NotDue {
                days_since,
                next_due_at,
            } => {
                debug!(days_since, threshold_days = self.policy.threshold_days, "refresh not due");
                Ok(RefreshOutcome::Skipped {
                    days_since,
                    next_due_at,
                })
            }
            RefreshDecision::Due { days_since } => {
                info!(
                    days_since = ?days_since,
                    threshold_days = self.policy.threshold_days,
                    feed = %feed.label(),
                    "refresh due"
                );
                let Some(batch) = fetch(feed)? else {
                    return Ok(RefreshOutcome::NoData);
                };
                let pipeline = IngestionPipeline::new(store);
                Ok(match pipeline.ingest_if_stamp(&batch, now, meta.last_refresh_at)? {
                    Some(report) => RefreshOutcome::Refreshed(report),
                    None => RefreshOutcome::Superseded,
                })
            }
        }
    }

    /// Fetches and ingests regardless of staleness.
    ///
    /// # Errors
    /// Propagates feed, validation and store failures.
    pub fn refresh_now(
        &self,
        store: &dyn CatalogStore,
        now: OffsetDateTime,
        feed: &dyn SourceFeed,
    ) -> Result<RefreshOutcome, CatalogError> {
        let _flight = self.enter();
        info!(feed = %feed.label(), "manual refresh requested");
        let Some(batch) = fetch(feed)? else {
            return Ok(RefreshOutcome::NoData);
        };
        let report = IngestionPipeline::new(store).ingest(&batch, now)?;
        Ok(RefreshOutcome::Refreshed(report))
    }

    /// Ingests an explicit batch under the same guard as the scheduled path.
    ///
    /// # Errors
    /// See [`IngestionPipeline::ingest`].
    pub fn ingest(
        &self,
        store: &dyn CatalogStore,
        records: &[ImportRecord],
        now: OffsetDateTime,
    ) -> Result<IngestReport, CatalogError> {
        let _flight = self.enter();
        IngestionPipeline::new(store).ingest(records, now)
    }

    fn enter(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `None` when the feed is absent or empty.
fn fetch(feed: &dyn SourceFeed) -> Result<Option<Vec<ImportRecord>>, CatalogError> {
    match feed.fetch_batch()? {
        Some(batch) if !batch.is_empty() => Ok(Some(batch)),
        _ => {
            info!(feed = %feed.label(), "source feed returned no data");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration as StdDuration;

    use super::*;
    use time::Duration;
    use ulid::Ulid;
    use vinorank_core::parse_rfc3339_utc;
    use vinorank_store_sqlite::SqliteCatalogStore;

    fn must<T>(result: Result<T, CatalogError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteCatalogStore {
        let store = must(SqliteCatalogStore::open_in_memory());
        must(store.migrate());
        store
    }

    fn fixture_now() -> OffsetDateTime {
        must(parse_rfc3339_utc("2026-07-01T06:00:00Z"))
    }

    fn one_wine_batch() -> Result<Option<Vec<ImportRecord>>, CatalogError> {
        Ok(Some(vec![ImportRecord {
            external_id: Some("x1".to_string()),
            name: Some("W1".to_string()),
            appellation: Some("Pauillac".to_string()),
            base_score: Some("4.0".to_string()),
            ..ImportRecord::default()
        }]))
    }

    fn scheduler() -> RefreshScheduler {
        must(RefreshScheduler::new(RefreshPolicy::default()))
    }

    #[test]
    fn seventy_four_days_is_not_due() {
        let store = fixture_store();
        let last = fixture_now() - Duration::days(74);
        must(store.set_refresh_meta(last));

        let fetches = AtomicUsize::new(0);
        let feed = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            one_wine_batch()
        };

        let outcome = must(scheduler().check_and_maybe_refresh(&store, fixture_now(), &feed));
        assert!(matches!(outcome, RefreshOutcome::Skipped { .. }));
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert_eq!(must(store.get_refresh_meta()).last_refresh_at, Some(last));
    }

    #[test]
    fn seventy_five_days_ingests_and_stamps_now() {
        let store = fixture_store();
        must(store.set_refresh_meta(fixture_now() - Duration::days(75)));

        let outcome = must(scheduler().check_and_maybe_refresh(&store, fixture_now(), &one_wine_batch));
        match outcome {
            RefreshOutcome::Refreshed(report) => assert_eq!(report.upserted_count, 1),
            other => panic!("expected refresh, got {other:?}"),
        }
        assert_eq!(
            must(store.get_refresh_meta()).last_refresh_at,
            Some(fixture_now())
        );
    }

    #[test]
    fn absent_refresh_meta_is_due() {
        let store = fixture_store();
        let outcome = must(scheduler().check_and_maybe_refresh(&store, fixture_now(), &one_wine_batch));
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert!(must(store.get_wine_by_external_id("x1")).is_some());
    }

    #[test]
    fn feed_without_data_leaves_stamp_unchanged() {
        let store = fixture_store();
        let last = fixture_now() - Duration::days(100);
        must(store.set_refresh_meta(last));

        let absent = || -> Result<Option<Vec<ImportRecord>>, CatalogError> { Ok(None) };
        let empty = || -> Result<Option<Vec<ImportRecord>>, CatalogError> { Ok(Some(Vec::new())) };

        let scheduler = scheduler();
        assert_eq!(
            must(scheduler.check_and_maybe_refresh(&store, fixture_now(), &absent)),
            RefreshOutcome::NoData
        );
        assert_eq!(
            must(scheduler.check_and_maybe_refresh(&store, fixture_now(), &empty)),
            RefreshOutcome::NoData
        );
        assert_eq!(must(store.get_refresh_meta()).last_refresh_at, Some(last));
    }

    #[test]
    fn feed_failure_propagates_without_writing() {
        let store = fixture_store();
        let failing = || -> Result<Option<Vec<ImportRecord>>, CatalogError> {
            Err(CatalogError::Source("upstream unavailable".to_string()))
        };

        assert!(matches!(
            scheduler().check_and_maybe_refresh(&store, fixture_now(), &failing),
            Err(CatalogError::Source(_))
        ));
        assert!(must(store.get_refresh_meta()).last_refresh_at.is_none());
    }

    #[test]
    fn refresh_now_ignores_staleness() {
        let store = fixture_store();
        must(store.set_refresh_meta(fixture_now() - Duration::days(1)));

        let outcome = must(scheduler().refresh_now(&store, fixture_now(), &one_wine_batch));
        assert!(matches!(outcome, RefreshOutcome::Refreshed(_)));
        assert_eq!(
            must(store.get_refresh_meta()).last_refresh_at,
            Some(fixture_now())
        );
    }

    #[test]
    fn due_check_is_superseded_by_a_refresh_from_another_connection() {
        let db_path =
            std::env::temp_dir().join(format!("vinorank-refresh-{}.sqlite3", Ulid::new()));
        let ours = must(SqliteCatalogStore::open(&db_path));
        must(ours.migrate());
        let theirs = must(SqliteCatalogStore::open(&db_path));

        let other_process = scheduler();
        let feed = || -> Result<Option<Vec<ImportRecord>>, CatalogError> {
            let outcome = other_process.check_and_maybe_refresh(&theirs, fixture_now(), &one_wine_batch);
            assert!(matches!(outcome, Ok(RefreshOutcome::Refreshed(_))));
            Ok(Some(vec![ImportRecord {
                external_id: Some("late".to_string()),
                name: Some("Late".to_string()),
                appellation: Some("Margaux".to_string()),
                base_score: Some("3.0".to_string()),
                ..ImportRecord::default()
            }]))
        };

        let outcome = must(scheduler().check_and_maybe_refresh(&ours, fixture_now(), &feed));
        assert_eq!(outcome, RefreshOutcome::Superseded);
        assert!(must(ours.get_wine_by_external_id("x1")).is_some());
        assert!(must(ours.get_wine_by_external_id("late")).is_none());

        drop(ours);
        drop(theirs);
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn concurrent_due_checks_ingest_once() {
        let store = fixture_store();
        let scheduler = scheduler();
        let fetches = AtomicUsize::new(0);
        let feed = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            thread::sleep(StdDuration::from_millis(25));
            one_wine_batch()
        };

        let workers = 4;
        let barrier = Barrier::new(workers);
        let outcomes = thread::scope(|scope| {
            let handles = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        scheduler.check_and_maybe_refresh(&store, fixture_now(), &feed)
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(outcome) => must(outcome),
                    Err(_) => panic!("due-check thread panicked"),
                })
                .collect::<Vec<_>>()
        });

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        let refreshed = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, RefreshOutcome::Refreshed(_)))
            .count();
        assert_eq!(refreshed, 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| matches!(outcome, RefreshOutcome::Skipped { .. }))
                .count(),
            workers - 1
        );
    }
}
