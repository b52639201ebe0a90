#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use time::OffsetDateTime;
use ulid::Ulid;
use vinorank_core::{
    format_rfc3339, now_utc, parse_rfc3339_utc, select_window, validate_adjustment_percent,
    AppellationCount, CatalogError, CatalogStore, OverrideRecord, RefreshMeta, ScoredWine,
    WineFilter, WineId, WineOrder, WineRecord, WineUpsert,
};

const CATALOG_MIGRATION_VERSION: i64 = 1;

const SCHEMA_CATALOG_V1: &str = r"
CREATE TABLE IF NOT EXISTS wines (
  wine_id TEXT PRIMARY KEY,
  external_id TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL,
  producer TEXT,
  appellation TEXT NOT NULL,
  vintage_year INTEGER,
  base_score REAL NOT NULL,
  review_count INTEGER NOT NULL DEFAULT 0 CHECK (review_count >= 0),
  price REAL CHECK (price >= 0.0 OR price IS NULL),
  source_updated_at TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wines_appellation
  ON wines(appellation);

CREATE TABLE IF NOT EXISTS wine_overrides (
  wine_id TEXT PRIMARY KEY,
  adjustment_percent REAL NOT NULL CHECK (adjustment_percent BETWEEN -25.0 AND 25.0),
  updated_at TEXT NOT NULL,
  FOREIGN KEY (wine_id) REFERENCES wines(wine_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS refresh_meta (
  singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
  last_refresh_at TEXT
);
";

const WINE_COLUMNS: &str = "w.wine_id, w.external_id, w.name, w.producer, w.appellation,
    w.vintage_year, w.base_score, w.review_count, w.price,
    w.source_updated_at, w.created_at, w.updated_at";

/// `CatalogStore` backed by a single `SQLite` connection.
///
/// The connection sits behind a mutex so one store can be shared between
/// the scheduler and readers on other threads.
pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open(path).storage(&format!(
            "failed to open sqlite database at {}",
            path.display()
        ))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .storage("failed to configure sqlite pragmas")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::open(Path::new(":memory:"))
    }

    pub fn migrate(&self) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )
        .storage("failed to ensure schema_migrations exists")?;

        conn.execute_batch(SCHEMA_CATALOG_V1)
            .storage("failed to apply catalog schema")?;

        let now = format_rfc3339(now_utc())?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![CATALOG_MIGRATION_VERSION, now],
        )
        .storage("failed to register catalog schema migration")?;

        conn.execute(
            "INSERT OR IGNORE INTO refresh_meta(singleton, last_refresh_at) VALUES (1, NULL)",
            [],
        )
        .storage("failed to initialize refresh metadata")?;

        Ok(())
    }

    pub fn schema_version(&self) -> Result<Option<i64>, CatalogError> {
        let conn = self.lock()?;
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .storage("failed to query schema version")
    }

    fn write_batch(
        &self,
        inputs: &[WineUpsert],
        refreshed_at: OffsetDateTime,
        check: StampCheck,
    ) -> Result<Option<usize>, CatalogError> {
        for input in inputs {
            input.validate()?;
        }
        let stamp = format_rfc3339(refreshed_at)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage("failed to start batch transaction")?;

        if let StampCheck::Expect(observed) = check {
            if read_refresh_meta(&tx)?.last_refresh_at != observed {
                return Ok(None);
            }
        }

        for input in inputs {
            upsert_wine_in(&tx, input, &stamp)?;
        }
        write_refresh_meta(&tx, &stamp)?;

        tx.commit().storage("failed to commit batch transaction")?;
        Ok(Some(inputs.len()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn
            .lock()
            .map_err(|_| CatalogError::Storage("sqlite connection mutex poisoned".to_string()))
    }

    #[cfg(test)]
    fn connection(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.lock()
    }
}

/// Precondition on the refresh stamp for a batch write.
enum StampCheck {
    None,
    Expect(Option<OffsetDateTime>),
}

impl CatalogStore for SqliteCatalogStore {
    fn upsert_wine(
        &self,
        input: &WineUpsert,
        source_updated_at: OffsetDateTime,
    ) -> Result<WineRecord, CatalogError> {
        input.validate()?;
        let stamp = format_rfc3339(source_updated_at)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage("failed to start upsert transaction")?;
        let record = upsert_wine_in(&tx, input, &stamp)?;
        tx.commit().storage("failed to commit upsert transaction")?;

        Ok(record)
    }

    fn upsert_wines(
        &self,
        inputs: &[WineUpsert],
        refreshed_at: OffsetDateTime,
    ) -> Result<usize, CatalogError> {
        self.write_batch(inputs, refreshed_at, StampCheck::None)
            .map(|written| written.unwrap_or_default())
    }

    fn upsert_wines_if_stamp(
        &self,
        inputs: &[WineUpsert],
        refreshed_at: OffsetDateTime,
        observed: Option<OffsetDateTime>,
    ) -> Result<Option<usize>, CatalogError> {
        self.write_batch(inputs, refreshed_at, StampCheck::Expect(observed))
    }

    fn get_wine(&self, id: WineId) -> Result<Option<WineRecord>, CatalogError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {WINE_COLUMNS} FROM wines w WHERE w.wine_id = ?1"),
            params![id.to_string()],
            |row| parse_wine_row(row, 0),
        )
        .optional()
        .storage("failed to load wine")
    }

    fn get_wine_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<WineRecord>, CatalogError> {
        let conn = self.lock()?;
        select_wine_by_external_id(&conn, external_id)
    }

    fn delete_wine(&self, id: WineId) -> Result<bool, CatalogError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM wines WHERE wine_id = ?1",
                params![id.to_string()],
            )
            .storage("failed to delete wine")?;
        Ok(removed > 0)
    }

    fn get_override(&self, wine_id: WineId) -> Result<Option<OverrideRecord>, CatalogError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT wine_id, adjustment_percent, updated_at
             FROM wine_overrides
             WHERE wine_id = ?1",
            params![wine_id.to_string()],
            |row| {
                Ok(OverrideRecord {
                    wine_id: parse_wine_id(&row.get::<_, String>(0)?)?,
                    adjustment_percent: row.get(1)?,
                    updated_at: parse_timestamp(&row.get::<_, String>(2)?)?,
                })
            },
        )
        .optional()
        .storage("failed to load override")
    }

    fn set_override(
        &self,
        wine_id: WineId,
        adjustment_percent: f64,
        updated_at: OffsetDateTime,
    ) -> Result<OverrideRecord, CatalogError> {
        let adjustment_percent = validate_adjustment_percent(adjustment_percent)?;
        let stamp = format_rfc3339(updated_at)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .storage("failed to start override transaction")?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM wines WHERE wine_id = ?1",
                params![wine_id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .storage("failed to check wine existence")?
            .is_some();
        if !exists {
            return Err(CatalogError::NotFound(format!("wine {wine_id}")));
        }

        tx.execute(
            "INSERT INTO wine_overrides(wine_id, adjustment_percent, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(wine_id) DO UPDATE SET
               adjustment_percent = excluded.adjustment_percent,
               updated_at = excluded.updated_at",
            params![wine_id.to_string(), adjustment_percent, stamp],
        )
        .storage("failed to upsert override")?;
        tx.commit().storage("failed to commit override transaction")?;

        Ok(OverrideRecord {
            wine_id,
            adjustment_percent,
            updated_at,
        })
    }

    fn clear_override(&self, wine_id: WineId) -> Result<bool, CatalogError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM wine_overrides WHERE wine_id = ?1",
                params![wine_id.to_string()],
            )
            .storage("failed to clear override")?;
        Ok(removed > 0)
    }

    fn query_wines(
        &self,
        filter: &WineFilter,
        order: WineOrder,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ScoredWine>, CatalogError> {
        let filter = filter.normalized();
        filter.validate()?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .storage("failed to start read transaction")?;

        let candidates = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {WINE_COLUMNS}, o.adjustment_percent, o.updated_at
                     FROM wines w
                     LEFT JOIN wine_overrides o ON o.wine_id = w.wine_id
                     WHERE ?1 IS NULL OR w.appellation = ?1"
                ))
                .storage("failed to prepare wine query")?;
            let rows = stmt
                .query_map(params![filter.appellation], parse_scored_row)
                .storage("failed to query wines")?;
            collect_rows(rows)?
        };
        tx.commit().storage("failed to close read transaction")?;

        Ok(select_window(candidates, &filter, order, limit, offset))
    }

    fn list_appellations(&self) -> Result<Vec<AppellationCount>, CatalogError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT appellation, COUNT(*)
                 FROM wines
                 GROUP BY appellation
                 ORDER BY appellation ASC",
            )
            .storage("failed to prepare appellation listing")?;

        let rows = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok(AppellationCount {
                    appellation: row.get(0)?,
                    wine_count: u64::try_from(count).map_err(|_| {
                        invalid_column(1, rusqlite::types::Type::Integer, "negative count")
                    })?,
                })
            })
            .storage("failed to list appellations")?;
        collect_rows(rows)
    }

    fn get_refresh_meta(&self) -> Result<RefreshMeta, CatalogError> {
        let conn = self.lock()?;
        read_refresh_meta(&conn)
    }

    fn set_refresh_meta(&self, refreshed_at: OffsetDateTime) -> Result<(), CatalogError> {
        let stamp = format_rfc3339(refreshed_at)?;
        let conn = self.lock()?;
        write_refresh_meta(&conn, &stamp)
    }
}

trait StorageContext<T> {
    fn storage(self, context: &str) -> Result<T, CatalogError>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn storage(self, context: &str) -> Result<T, CatalogError> {
        self.map_err(|err| CatalogError::Storage(format!("{context}: {err}")))
    }
}

fn upsert_wine_in(
    conn: &Connection,
    input: &WineUpsert,
    stamp: &str,
) -> Result<WineRecord, CatalogError> {
    conn.execute(
        "INSERT INTO wines(
            wine_id, external_id, name, producer, appellation,
            vintage_year, base_score, review_count, price,
            source_updated_at, created_at, updated_at
         ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?10, ?10
         )
         ON CONFLICT(external_id) DO UPDATE SET
           name = excluded.name,
           producer = excluded.producer,
           appellation = excluded.appellation,
           vintage_year = excluded.vintage_year,
           base_score = excluded.base_score,
           review_count = excluded.review_count,
           price = excluded.price,
           source_updated_at = excluded.source_updated_at,
           updated_at = excluded.updated_at",
        params![
            WineId::generate().to_string(),
            input.external_id,
            input.name,
            input.producer,
            input.appellation,
            input.vintage_year,
            input.base_score,
            i64::from(input.review_count),
            input.price,
            stamp,
        ],
    )
    .storage(&format!("failed to upsert wine {}", input.external_id))?;

    select_wine_by_external_id(conn, &input.external_id)?.ok_or_else(|| {
        CatalogError::Storage(format!(
            "wine {} missing after upsert",
            input.external_id
        ))
    })
}

fn select_wine_by_external_id(
    conn: &Connection,
    external_id: &str,
) -> Result<Option<WineRecord>, CatalogError> {
    conn.query_row(
        &format!("SELECT {WINE_COLUMNS} FROM wines w WHERE w.external_id = ?1"),
        params![external_id],
        |row| parse_wine_row(row, 0),
    )
    .optional()
    .storage("failed to load wine by external id")
}

fn read_refresh_meta(conn: &Connection) -> Result<RefreshMeta, CatalogError> {
    let raw = conn
        .query_row(
            "SELECT last_refresh_at FROM refresh_meta WHERE singleton = 1",
            [],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .storage("failed to load refresh metadata")?
        .flatten();

    let last_refresh_at = match raw {
        Some(value) => Some(parse_rfc3339_utc(&value)?),
        None => None,
    };
    Ok(RefreshMeta { last_refresh_at })
}

fn write_refresh_meta(conn: &Connection, stamp: &str) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO refresh_meta(singleton, last_refresh_at) VALUES (1, ?1)
         ON CONFLICT(singleton) DO UPDATE SET last_refresh_at = excluded.last_refresh_at",
        params![stamp],
    )
    .storage("failed to update refresh metadata")?;
    Ok(())
}

fn parse_wine_row(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<WineRecord> {
    let review_count_i64: i64 = row.get(start + 7)?;
    let review_count = u32::try_from(review_count_i64).map_err(|_| {
        invalid_column(
            start + 7,
            rusqlite::types::Type::Integer,
            &format!("invalid review_count value: {review_count_i64}"),
        )
    })?;

    Ok(WineRecord {
        id: parse_wine_id(&row.get::<_, String>(start)?)?,
        external_id: row.get(start + 1)?,
        name: row.get(start + 2)?,
        producer: row.get(start + 3)?,
        appellation: row.get(start + 4)?,
        vintage_year: row.get(start + 5)?,
        base_score: row.get(start + 6)?,
        review_count,
        price: row.get(start + 8)?,
        source_updated_at: parse_timestamp(&row.get::<_, String>(start + 9)?)?,
        created_at: parse_timestamp(&row.get::<_, String>(start + 10)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(start + 11)?)?,
    })
}

fn parse_scored_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScoredWine> {
    let wine = parse_wine_row(row, 0)?;
    let percent: Option<f64> = row.get(12)?;
    let override_updated_at: Option<String> = row.get(13)?;

    let adjustment = match (percent, override_updated_at) {
        (Some(adjustment_percent), Some(raw)) => Some(OverrideRecord {
            wine_id: wine.id,
            adjustment_percent,
            updated_at: parse_timestamp(&raw)?,
        }),
        _ => None,
    };

    Ok(ScoredWine::new(wine, adjustment))
}

fn parse_wine_id(raw: &str) -> rusqlite::Result<WineId> {
    let parsed = Ulid::from_string(raw).map_err(|_| {
        invalid_column(
            0,
            rusqlite::types::Type::Text,
            &format!("invalid ULID: {raw}"),
        )
    })?;

    Ok(WineId(parsed))
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<OffsetDateTime> {
    parse_rfc3339_utc(raw).map_err(to_sql_error)
}

fn invalid_column(index: usize, kind: rusqlite::types::Type, message: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message.to_string(),
        )),
    )
}

#[allow(clippy::needless_pass_by_value)]
fn to_sql_error(err: CatalogError) -> rusqlite::Error {
    invalid_column(0, rusqlite::types::Type::Text, &err.to_string())
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>, CatalogError> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row.storage("failed to decode row")?);
    }
    Ok(values)
}
