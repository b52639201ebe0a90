use tracing::info;
use vinorank_core::{
    validate_adjustment_percent, AppellationCount, Authorization, CatalogError, CatalogStore,
    Clock, ImportRecord, IngestReport, OverrideRecord, RankWindow, RankedWine, RefreshPolicy,
    RefreshStatus, ScoredWine, SourceFeed, SystemClock, WineFilter, WineId, WineRecord,
};

use crate::ranking::RankingEngine;
use crate::refresh::{RefreshOutcome, RefreshScheduler};

/// Application-facing entry point: read operations are open, mutating ones
/// require a granted [`Authorization`].
pub struct Catalog<S, C = SystemClock> {
    store: S,
    clock: C,
    scheduler: RefreshScheduler,
}

impl<S: CatalogStore, C: Clock> Catalog<S, C> {
    /// # Errors
    /// Returns [`CatalogError::Configuration`] for an invalid refresh policy.
    pub fn new(store: S, clock: C, policy: RefreshPolicy) -> Result<Self, CatalogError> {
        Ok(Self {
            store,
            clock,
            scheduler: RefreshScheduler::new(policy)?,
        })
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn policy(&self) -> RefreshPolicy {
        self.scheduler.policy()
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn list_appellations(&self) -> Result<Vec<AppellationCount>, CatalogError> {
        self.store.list_appellations()
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn rank(
        &self,
        filter: &WineFilter,
        window: RankWindow,
        offset: usize,
    ) -> Result<Vec<RankedWine>, CatalogError> {
        RankingEngine::new(&self.store).rank(filter, window, offset)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn browse(
        &self,
        filter: &WineFilter,
        window: RankWindow,
        offset: usize,
    ) -> Result<Vec<RankedWine>, CatalogError> {
        RankingEngine::new(&self.store).browse(filter, window, offset)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn wine(&self, id: WineId) -> Result<Option<ScoredWine>, CatalogError> {
        let wine = self.store.get_wine(id)?;
        self.with_adjustment(wine)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn wine_by_external_id(&self, external_id: &str) -> Result<Option<ScoredWine>, CatalogError> {
        let wine = self.store.get_wine_by_external_id(external_id.trim())?;
        self.with_adjustment(wine)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn refresh_status(&self) -> Result<RefreshStatus, CatalogError> {
        self.scheduler.status(&self.store, self.clock.now())
    }

    /// # Errors
    /// Returns [`CatalogError::Unauthorized`], [`CatalogError::Validation`]
    /// for a percentage outside `[-25, 25]`, or [`CatalogError::NotFound`]
    /// for an unknown wine.
    pub fn set_override(
        &self,
        auth: Authorization,
        wine_id: WineId,
        adjustment_percent: f64,
    ) -> Result<OverrideRecord, CatalogError> {
        auth.require("set_override")?;
        let adjustment_percent = validate_adjustment_percent(adjustment_percent)?;

        let record = self
            .store
            .set_override(wine_id, adjustment_percent, self.clock.now())?;
        info!(wine_id = %wine_id, adjustment_percent, "override set");
        Ok(record)
    }

    /// Resets a wine to its source score; `false` when no override existed.
    ///
    /// # Errors
    /// Returns [`CatalogError::Unauthorized`] or a store failure.
    pub fn clear_override(&self, auth: Authorization, wine_id: WineId) -> Result<bool, CatalogError> {
        auth.require("clear_override")?;
        let cleared = self.store.clear_override(wine_id)?;
        info!(wine_id = %wine_id, cleared, "override cleared");
        Ok(cleared)
    }

    /// # Errors
    /// Returns [`CatalogError::Unauthorized`] or a store failure.
    pub fn delete_wine(&self, auth: Authorization, id: WineId) -> Result<bool, CatalogError> {
        auth.require("delete_wine")?;
        let deleted = self.store.delete_wine(id)?;
        info!(wine_id = %id, deleted, "wine deleted");
        Ok(deleted)
    }

    /// # Errors
    /// Returns [`CatalogError::Unauthorized`] or any ingestion failure.
    pub fn ingest(
        &self,
        auth: Authorization,
        records: &[ImportRecord],
    ) -> Result<IngestReport, CatalogError> {
        auth.require("ingest")?;
        self.scheduler.ingest(&self.store, records, self.clock.now())
    }

    /// # Errors
    /// Returns [`CatalogError::Unauthorized`] or any feed or ingestion
    /// failure.
    pub fn trigger_refresh_now(
        &self,
        auth: Authorization,
        feed: &dyn SourceFeed,
    ) -> Result<RefreshOutcome, CatalogError> {
        auth.require("trigger_refresh_now")?;
        self.scheduler.refresh_now(&self.store, self.clock.now(), feed)
    }

    /// Periodic due-check; refreshes from `feed` only when the catalog is
    /// stale.
    ///
    /// # Errors
    /// Propagates feed and ingestion failures.
    pub fn run_due_check(&self, feed: &dyn SourceFeed) -> Result<RefreshOutcome, CatalogError> {
        self.scheduler
            .check_and_maybe_refresh(&self.store, self.clock.now(), feed)
    }

    fn with_adjustment(&self, wine: Option<WineRecord>) -> Result<Option<ScoredWine>, CatalogError> {
        let Some(wine) = wine else {
            return Ok(None);
        };
        let adjustment = self.store.get_override(wine.id)?;
        Ok(Some(ScoredWine::new(wine, adjustment)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use time::{Duration, OffsetDateTime};
    use vinorank_core::{parse_rfc3339_utc, FixedClock};
    use vinorank_store_sqlite::SqliteCatalogStore;

    fn must<T>(result: Result<T, CatalogError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    fn fixture_now() -> OffsetDateTime {
        must(parse_rfc3339_utc("2026-09-01T12:00:00Z"))
    }

    fn fixture_catalog(now: OffsetDateTime) -> Catalog<SqliteCatalogStore, FixedClock> {
        let store = must(SqliteCatalogStore::open_in_memory());
        must(store.migrate());
        must(Catalog::new(store, FixedClock(now), RefreshPolicy::default()))
    }

    fn pauillac(name: &str, score: &str) -> ImportRecord {
        ImportRecord {
            external_id: Some("x1".to_string()),
            name: Some(name.to_string()),
            appellation: Some("Pauillac".to_string()),
            base_score: Some(score.to_string()),
            ..ImportRecord::default()
        }
    }

    #[test]
    fn override_survives_reingest_and_reapplies_to_new_base_score() {
        let catalog = fixture_catalog(fixture_now());
        let admin = Authorization::granted();

        must(catalog.ingest(admin, &[pauillac("W1", "4.0")]));
        let wine = must_some(must(catalog.wine_by_external_id("x1")));
        must(catalog.set_override(admin, wine.wine.id, 10.0));

        let ranked = must(catalog.rank(&WineFilter::for_appellation("Pauillac"), RankWindow::Default, 0));
        assert!((ranked[0].entry.effective_score - 4.4).abs() < 1e-9);

        must(catalog.ingest(admin, &[pauillac("W1-renamed", "4.2")]));
        let ranked = must(catalog.rank(&WineFilter::for_appellation("Pauillac"), RankWindow::Default, 0));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entry.wine.name, "W1-renamed");
        assert_eq!(ranked[0].entry.wine.base_score, 4.2);
        assert_eq!(ranked[0].entry.adjustment_percent(), 10.0);
        assert!((ranked[0].entry.effective_score - 4.62).abs() < 1e-9);
    }

    #[test]
    fn mutating_operations_require_authorization() {
        let catalog = fixture_catalog(fixture_now());
        let denied = Authorization::denied();
        let feed = || -> Result<Option<Vec<ImportRecord>>, CatalogError> { Ok(None) };

        assert!(matches!(
            catalog.ingest(denied, &[pauillac("W1", "4.0")]),
            Err(CatalogError::Unauthorized(_))
        ));
        assert!(matches!(
            catalog.set_override(denied, WineId::generate(), 5.0),
            Err(CatalogError::Unauthorized(_))
        ));
        assert!(matches!(
            catalog.clear_override(denied, WineId::generate()),
            Err(CatalogError::Unauthorized(_))
        ));
        assert!(matches!(
            catalog.delete_wine(denied, WineId::generate()),
            Err(CatalogError::Unauthorized(_))
        ));
        assert!(matches!(
            catalog.trigger_refresh_now(denied, &feed),
            Err(CatalogError::Unauthorized(_))
        ));
        assert!(must(catalog.list_appellations()).is_empty());
    }

    #[test]
    fn set_override_checks_range_then_existence() {
        let catalog = fixture_catalog(fixture_now());
        let admin = Authorization::granted();

        assert!(matches!(
            catalog.set_override(admin, WineId::generate(), 25.1),
            Err(CatalogError::Validation(_))
        ));
        assert!(matches!(
            catalog.set_override(admin, WineId::generate(), -25.0),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn clearing_override_restores_base_score() {
        let catalog = fixture_catalog(fixture_now());
        let admin = Authorization::granted();
        must(catalog.ingest(admin, &[pauillac("W1", "4.0")]));
        let id = must_some(must(catalog.wine_by_external_id("x1"))).wine.id;

        must(catalog.set_override(admin, id, -25.0));
        assert!((must_some(must(catalog.wine(id))).effective_score - 3.0).abs() < 1e-9);

        assert!(must(catalog.clear_override(admin, id)));
        assert_eq!(must_some(must(catalog.wine(id))).effective_score, 4.0);
    }

    #[test]
    fn deleted_wine_disappears_with_its_override() {
        let catalog = fixture_catalog(fixture_now());
        let admin = Authorization::granted();
        must(catalog.ingest(admin, &[pauillac("W1", "4.0")]));
        let id = must_some(must(catalog.wine_by_external_id("x1"))).wine.id;
        must(catalog.set_override(admin, id, 5.0));

        assert!(must(catalog.delete_wine(admin, id)));
        assert!(must(catalog.wine(id)).is_none());
        assert!(must(catalog.store().get_override(id)).is_none());
    }

    #[test]
    fn due_check_uses_injected_clock() {
        let now = fixture_now();
        let catalog = fixture_catalog(now);
        must(catalog.store().set_refresh_meta(now - Duration::days(74)));
        let feed = || -> Result<Option<Vec<ImportRecord>>, CatalogError> {
            Ok(Some(vec![pauillac("W1", "4.0")]))
        };

        assert!(matches!(
            must(catalog.run_due_check(&feed)),
            RefreshOutcome::Skipped { .. }
        ));
        let status = must(catalog.refresh_status());
        assert!(!status.due);
        assert_eq!(status.threshold_days, catalog.policy().threshold_days);

        must(catalog.store().set_refresh_meta(now - Duration::days(75)));
        assert!(must(catalog.refresh_status()).due);
        assert!(matches!(
            must(catalog.run_due_check(&feed)),
            RefreshOutcome::Refreshed(_)
        ));
        assert_eq!(
            must(catalog.store().get_refresh_meta()).last_refresh_at,
            Some(now)
        );
    }
}
