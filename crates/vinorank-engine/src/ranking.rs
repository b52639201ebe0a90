use tracing::debug;
use vinorank_core::{CatalogError, CatalogStore, RankWindow, RankedWine, WineFilter, WineOrder};

pub struct RankingEngine<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> RankingEngine<'a> {
    #[must_use]
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Ranked window over the wines matching `filter`.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] for invalid score bounds and
    /// propagates store failures.
    pub fn rank(
        &self,
        filter: &WineFilter,
        window: RankWindow,
        offset: usize,
    ) -> Result<Vec<RankedWine>, CatalogError> {
        self.window(filter, WineOrder::Ranked, window, offset)
    }

    /// Same window as [`RankingEngine::rank`], ordered by name instead.
    ///
    /// # Errors
    /// See [`RankingEngine::rank`].
    pub fn browse(
        &self,
        filter: &WineFilter,
        window: RankWindow,
        offset: usize,
    ) -> Result<Vec<RankedWine>, CatalogError> {
        self.window(filter, WineOrder::Name, window, offset)
    }

    fn window(
        &self,
        filter: &WineFilter,
        order: WineOrder,
        window: RankWindow,
        offset: usize,
    ) -> Result<Vec<RankedWine>, CatalogError> {
        let filter = filter.normalized();
        filter.validate()?;
        let limit = window.resolve(&filter);

        let entries = self.store.query_wines(&filter, order, limit, offset)?;
        debug!(
            appellation = filter.appellation.as_deref().unwrap_or("*"),
            limit = ?limit,
            offset,
            returned = entries.len(),
            "ranked catalog window"
        );

        Ok(RankedWine::number(entries, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vinorank_core::{parse_rfc3339_utc, WineUpsert};
    use vinorank_store_sqlite::SqliteCatalogStore;

    fn must<T>(result: Result<T, CatalogError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn seeded_store(margaux: usize, pauillac: usize) -> SqliteCatalogStore {
        let store = must(SqliteCatalogStore::open_in_memory());
        must(store.migrate());

        let batch = (0..margaux)
            .map(|index| ("Margaux", index))
            .chain((0..pauillac).map(|index| ("Pauillac", index)))
            .map(|(appellation, index)| WineUpsert {
                external_id: format!("{}-{index:03}", appellation.to_lowercase()),
                name: format!("{appellation} cuvée {index:03}"),
                producer: None,
                appellation: appellation.to_string(),
                vintage_year: None,
                base_score: 3.0 + f64::from(u32::try_from(index % 20).unwrap_or(0)) / 10.0,
                review_count: u32::try_from(index).unwrap_or(0),
                price: None,
            })
            .collect::<Vec<_>>();
        must(store.upsert_wines(&batch, must(parse_rfc3339_utc("2026-05-01T00:00:00Z"))));
        store
    }

    #[test]
    fn default_windows_cap_appellation_and_global_lists() {
        let store = seeded_store(30, 90);
        let engine = RankingEngine::new(&store);

        let margaux = must(engine.rank(
            &WineFilter::for_appellation("Margaux"),
            RankWindow::Default,
            0,
        ));
        assert_eq!(margaux.len(), 20);
        assert!(margaux.iter().all(|item| item.entry.wine.appellation == "Margaux"));

        let global = must(engine.rank(&WineFilter::default(), RankWindow::Default, 0));
        assert_eq!(global.len(), 100);

        let everything = must(engine.rank(&WineFilter::default(), RankWindow::Unbounded, 0));
        assert_eq!(everything.len(), 120);
    }

    #[test]
    fn positions_continue_after_offset() {
        let store = seeded_store(5, 0);
        let engine = RankingEngine::new(&store);

        let page = must(engine.rank(&WineFilter::default(), RankWindow::Limit(2), 2));
        let positions = page.iter().map(|item| item.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![3, 4]);
        assert!(page[0].entry.effective_score >= page[1].entry.effective_score);
    }

    #[test]
    fn browse_orders_by_name() {
        let store = seeded_store(3, 2);
        let engine = RankingEngine::new(&store);

        let names = must(engine.browse(&WineFilter::default(), RankWindow::Unbounded, 0))
            .into_iter()
            .map(|item| item.entry.wine.name)
            .collect::<Vec<_>>();
        let mut sorted = names.clone();
        sorted.sort_by_key(|name| name.to_lowercase());
        assert_eq!(names, sorted);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let store = seeded_store(1, 0);
        let engine = RankingEngine::new(&store);
        let filter = WineFilter {
            min_score: Some(4.5),
            max_score: Some(4.0),
            ..WineFilter::default()
        };
        assert!(matches!(
            engine.rank(&filter, RankWindow::Default, 0),
            Err(CatalogError::Validation(_))
        ));
    }
}
