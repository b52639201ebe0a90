//! Domain model of the wine ranking engine.
//!
//! Source data (`WineRecord`) and admin judgment (`OverrideRecord`) are kept
//! apart; the effective score is always derived through [`effective_score`]
//! and never persisted.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub const MIN_ADJUSTMENT_PERCENT: f64 = -25.0;
pub const MAX_ADJUSTMENT_PERCENT: f64 = 25.0;
pub const DEFAULT_APPELLATION_WINDOW: usize = 20;
pub const DEFAULT_GLOBAL_WINDOW: usize = 100;
pub const DEFAULT_STALENESS_DAYS: u32 = 75;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CatalogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("source feed error: {0}")]
    Source(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CatalogError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Storage(_) => "storage",
            Self::Source(_) => "source",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct WineId(pub Ulid);

impl WineId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl Display for WineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WineId {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(value.trim())
            .map(Self)
            .map_err(|err| CatalogError::Validation(format!("invalid wine id {value:?}: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WineRecord {
    pub id: WineId,
    pub external_id: String,
    pub name: String,
    pub producer: Option<String>,
    pub appellation: String,
    pub vintage_year: Option<i32>,
    pub base_score: f64,
    pub review_count: u32,
    pub price: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub source_updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Source-derived fields of one wine, already coerced and validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WineUpsert {
    pub external_id: String,
    pub name: String,
    pub producer: Option<String>,
    pub appellation: String,
    pub vintage_year: Option<i32>,
    pub base_score: f64,
    pub review_count: u32,
    pub price: Option<f64>,
}

impl WineUpsert {
    /// Validates a normalized wine before it reaches the store.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] when a required field is blank or
    /// a numeric field is outside its domain.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (field, value) in [
            ("external_id", &self.external_id),
            ("name", &self.name),
            ("appellation", &self.appellation),
        ] {
            if value.trim().is_empty() {
                return Err(CatalogError::Validation(format!(
                    "{field} MUST be provided"
                )));
            }
        }

        if !self.base_score.is_finite() {
            return Err(CatalogError::Validation(
                "base_score MUST be a finite number".to_string(),
            ));
        }

        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(CatalogError::Validation(
                    "price MUST be a non-negative number".to_string(),
                ));
            }
        }

        if let Some(year) = self.vintage_year {
            if !(1000..=9999).contains(&year) {
                return Err(CatalogError::Validation(format!(
                    "vintage_year {year} is outside 1000..=9999"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverrideRecord {
    pub wine_id: WineId,
    pub adjustment_percent: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshMeta {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh_at: Option<OffsetDateTime>,
}

/// One import row as handed over by a parser, before coercion.
///
/// Every value is raw text; absent cells are `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRecord {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub producer: Option<String>,
    pub appellation: Option<String>,
    pub vintage: Option<String>,
    pub base_score: Option<String>,
    pub review_count: Option<String>,
    pub price: Option<String>,
}

impl ImportRecord {
    /// Coerces a raw row into a [`WineUpsert`].
    ///
    /// Numeric cells never fail the row: unparseable scores and review counts
    /// become 0, unparseable prices and vintages become absent. A missing
    /// external id is derived with [`derive_external_id`].
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] when `name` or `appellation` is
    /// missing.
    pub fn normalize(&self) -> Result<WineUpsert, CatalogError> {
        let name = required_text(self.name.as_deref(), "name")?;
        let appellation = required_text(self.appellation.as_deref(), "appellation")?;
        let vintage_year = coerce_vintage(self.vintage.as_deref());
        let external_id = optional_text(self.external_id.as_deref())
            .unwrap_or_else(|| derive_external_id(&name, vintage_year, &appellation));

        let upsert = WineUpsert {
            external_id,
            name,
            producer: optional_text(self.producer.as_deref()),
            appellation,
            vintage_year,
            base_score: coerce_base_score(self.base_score.as_deref()),
            review_count: coerce_review_count(self.review_count.as_deref()),
            price: coerce_price(self.price.as_deref()),
        };
        upsert.validate()?;
        Ok(upsert)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub upserted_count: usize,
    pub rejected: Vec<RejectedRecord>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub refreshed_at: Option<OffsetDateTime>,
}

/// A wine joined with its override and the derived effective score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredWine {
    pub wine: WineRecord,
    pub adjustment: Option<OverrideRecord>,
    pub effective_score: f64,
}

impl ScoredWine {
    #[must_use]
    pub fn new(wine: WineRecord, adjustment: Option<OverrideRecord>) -> Self {
        let percent = adjustment
            .as_ref()
            .map_or(0.0, |item| item.adjustment_percent);
        let effective_score = effective_score(wine.base_score, percent);
        Self {
            wine,
            adjustment,
            effective_score,
        }
    }

    #[must_use]
    pub fn adjustment_percent(&self) -> f64 {
        self.adjustment
            .as_ref()
            .map_or(0.0, |item| item.adjustment_percent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedWine {
    pub position: usize,
    #[serde(flatten)]
    pub entry: ScoredWine,
}

impl RankedWine {
    /// Numbers an already ordered window; positions continue after `offset`.
    #[must_use]
    pub fn number(entries: Vec<ScoredWine>, offset: usize) -> Vec<Self> {
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Self {
                position: offset + index + 1,
                entry,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppellationCount {
    pub appellation: String,
    pub wine_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WineFilter {
    pub appellation: Option<String>,
    pub query: Option<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

impl WineFilter {
    #[must_use]
    pub fn for_appellation(appellation: &str) -> Self {
        Self {
            appellation: Some(appellation.to_string()),
            ..Self::default()
        }
    }

    /// Drops blank text predicates so `Some("")` behaves like no predicate.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            appellation: optional_text(self.appellation.as_deref()),
            query: optional_text(self.query.as_deref()),
            min_score: self.min_score,
            max_score: self.max_score,
        }
    }

    /// # Errors
    /// Returns [`CatalogError::Validation`] when a score bound is not finite
    /// or the lower bound exceeds the upper bound.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (name, bound) in [("min_score", self.min_score), ("max_score", self.max_score)] {
            if bound.is_some_and(|value| !value.is_finite()) {
                return Err(CatalogError::Validation(format!(
                    "{name} MUST be a finite number"
                )));
            }
        }

        if let (Some(min), Some(max)) = (self.min_score, self.max_score) {
            if min > max {
                return Err(CatalogError::Validation(
                    "min_score cannot exceed max_score".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Applies every predicate; score bounds are inclusive and compare
    /// against the effective score.
    #[must_use]
    pub fn matches(&self, scored: &ScoredWine) -> bool {
        if let Some(appellation) = &self.appellation {
            if scored.wine.appellation != *appellation {
                return false;
            }
        }

        if let Some(query) = &self.query {
            let needle = query.to_lowercase();
            let in_name = scored.wine.name.to_lowercase().contains(&needle);
            let in_producer = scored
                .wine
                .producer
                .as_deref()
                .is_some_and(|producer| producer.to_lowercase().contains(&needle));
            if !in_name && !in_producer {
                return false;
            }
        }

        if self
            .min_score
            .is_some_and(|min| scored.effective_score < min)
        {
            return false;
        }

        if self
            .max_score
            .is_some_and(|max| scored.effective_score > max)
        {
            return false;
        }

        true
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WineOrder {
    #[default]
    Ranked,
    Name,
}

impl WineOrder {
    #[must_use]
    pub fn compare(self, lhs: &ScoredWine, rhs: &ScoredWine) -> Ordering {
        match self {
            Self::Ranked => compare_ranked(lhs, rhs),
            Self::Name => compare_by_name(lhs, rhs),
        }
    }
}

/// Requested size of a ranked window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RankWindow {
    /// 20 for an appellation list, 100 for the global view.
    #[default]
    Default,
    Limit(usize),
    Unbounded,
}

impl RankWindow {
    #[must_use]
    pub fn resolve(self, filter: &WineFilter) -> Option<usize> {
        match self {
            Self::Default => {
                if optional_text(filter.appellation.as_deref()).is_some() {
                    Some(DEFAULT_APPELLATION_WINDOW)
                } else {
                    Some(DEFAULT_GLOBAL_WINDOW)
                }
            }
            Self::Limit(limit) => Some(limit),
            Self::Unbounded => None,
        }
    }
}

/// Saturates an adjustment percentage to the override domain.
#[must_use]
pub fn clamp_adjustment(percent: f64) -> f64 {
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(MIN_ADJUSTMENT_PERCENT, MAX_ADJUSTMENT_PERCENT)
}

#[must_use]
pub fn effective_score(base_score: f64, adjustment_percent: f64) -> f64 {
    base_score * (1.0 + clamp_adjustment(adjustment_percent) / 100.0)
}

/// Checks an admin-supplied adjustment at the write boundary.
///
/// # Errors
/// Returns [`CatalogError::Validation`] for values outside
/// `[-25, 25]`, including NaN and infinities.
pub fn validate_adjustment_percent(percent: f64) -> Result<f64, CatalogError> {
    if !(MIN_ADJUSTMENT_PERCENT..=MAX_ADJUSTMENT_PERCENT).contains(&percent) {
        return Err(CatalogError::Validation(format!(
            "adjustment_percent MUST be in [{MIN_ADJUSTMENT_PERCENT}, {MAX_ADJUSTMENT_PERCENT}], got {percent}"
        )));
    }
    Ok(percent)
}

/// Ranking order: effective score desc, review count desc, price asc with
/// unpriced entries last, then external id and id for a total order.
#[must_use]
pub fn compare_ranked(lhs: &ScoredWine, rhs: &ScoredWine) -> Ordering {
    rhs.effective_score
        .total_cmp(&lhs.effective_score)
        .then_with(|| rhs.wine.review_count.cmp(&lhs.wine.review_count))
        .then_with(|| compare_price_missing_last(lhs.wine.price, rhs.wine.price))
        .then_with(|| lhs.wine.external_id.cmp(&rhs.wine.external_id))
        .then_with(|| lhs.wine.id.cmp(&rhs.wine.id))
}

#[must_use]
pub fn compare_by_name(lhs: &ScoredWine, rhs: &ScoredWine) -> Ordering {
    lhs.wine
        .name
        .to_lowercase()
        .cmp(&rhs.wine.name.to_lowercase())
        .then_with(|| lhs.wine.vintage_year.cmp(&rhs.wine.vintage_year))
        .then_with(|| lhs.wine.external_id.cmp(&rhs.wine.external_id))
        .then_with(|| lhs.wine.id.cmp(&rhs.wine.id))
}

fn compare_price_missing_last(lhs: Option<f64>, rhs: Option<f64>) -> Ordering {
    match (lhs, rhs) {
        (Some(left), Some(right)) => left.total_cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Filters, orders and windows a candidate set.
#[must_use]
pub fn select_window(
    candidates: Vec<ScoredWine>,
    filter: &WineFilter,
    order: WineOrder,
    limit: Option<usize>,
    offset: usize,
) -> Vec<ScoredWine> {
    let mut matching = candidates
        .into_iter()
        .filter(|item| filter.matches(item))
        .collect::<Vec<_>>();
    matching.sort_by(|lhs, rhs| order.compare(lhs, rhs));

    matching
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Fallback upsert key for rows without an explicit identifier.
#[must_use]
pub fn derive_external_id(name: &str, vintage_year: Option<i32>, appellation: &str) -> String {
    let vintage = vintage_year.map_or_else(|| "nv".to_string(), |year| year.to_string());
    format!(
        "auto:{}:{}:{}",
        key_part(name),
        vintage,
        key_part(appellation)
    )
}

#[must_use]
pub fn coerce_base_score(raw: Option<&str>) -> f64 {
    parse_decimal(raw).unwrap_or(0.0)
}

#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn coerce_review_count(raw: Option<&str>) -> u32 {
    match parse_decimal(raw) {
        Some(value) if value > 0.0 => value.trunc().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

#[must_use]
pub fn coerce_price(raw: Option<&str>) -> Option<f64> {
    let stripped = raw?
        .trim()
        .trim_matches(|c: char| matches!(c, '$' | '€' | '£' | '¥'))
        .trim();
    parse_decimal(Some(stripped)).filter(|value| *value >= 0.0)
}

/// Integral years only; JSON feeds often carry `2019.0`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn coerce_vintage(raw: Option<&str>) -> Option<i32> {
    let year = parse_decimal(raw)?;
    if year.fract() != 0.0 || !(1000.0..=9999.0).contains(&year) {
        return None;
    }
    Some(year as i32)
}

/// Commas are thousands separators when a dot is present or when every
/// group after the first has exactly three digits (`1,250`); otherwise a
/// single comma is the decimal mark (`4,5`).
fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    let compact = raw?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    if compact.is_empty() {
        return None;
    }

    let normalized = if compact.contains('.') || is_thousands_grouped(&compact) {
        compact.replace(',', "")
    } else {
        compact.replace(',', ".")
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn is_thousands_grouped(value: &str) -> bool {
    let unsigned = value.strip_prefix(['-', '+']).unwrap_or(value);
    let mut groups = unsigned.split(',');
    let Some(lead) = groups.next() else {
        return false;
    };
    let lead_ok = (1..=3).contains(&lead.len()) && lead.bytes().all(|b| b.is_ascii_digit());

    let mut tail_count = 0;
    for group in groups {
        if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        tail_count += 1;
    }
    lead_ok && tail_count > 0
}

fn key_part(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

fn required_text(value: Option<&str>, field: &str) -> Result<String, CatalogError> {
    optional_text(value)
        .ok_or_else(|| CatalogError::Validation(format!("{field} is required for import")))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct RefreshPolicy {
    pub threshold_days: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold_days: DEFAULT_STALENESS_DAYS,
        }
    }
}

impl RefreshPolicy {
    /// # Errors
    /// Returns [`CatalogError::Configuration`] when the threshold is zero.
    pub fn new(threshold_days: u32) -> Result<Self, CatalogError> {
        let policy = Self { threshold_days };
        policy.validate()?;
        Ok(policy)
    }

    /// # Errors
    /// Returns [`CatalogError::Configuration`] when the threshold is zero.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.threshold_days == 0 {
            return Err(CatalogError::Configuration(
                "threshold_days MUST be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn threshold(&self) -> Duration {
        Duration::days(i64::from(self.threshold_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshDecision {
    /// `days_since` is `None` when no ingestion ever succeeded.
    Due { days_since: Option<f64> },
    NotDue {
        days_since: f64,
        next_due_at: OffsetDateTime,
    },
}

impl RefreshDecision {
    #[must_use]
    pub fn is_due(&self) -> bool {
        matches!(self, Self::Due { .. })
    }

    #[must_use]
    pub fn days_since(&self) -> Option<f64> {
        match self {
            Self::Due { days_since } => *days_since,
            Self::NotDue { days_since, .. } => Some(*days_since),
        }
    }
}

#[must_use]
pub fn evaluate_refresh(
    last_refresh_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
    policy: &RefreshPolicy,
) -> RefreshDecision {
    let Some(last) = last_refresh_at else {
        return RefreshDecision::Due { days_since: None };
    };

    let elapsed = now - last;
    let days = days_since(last, now);
    if elapsed >= policy.threshold() {
        RefreshDecision::Due {
            days_since: Some(days),
        }
    } else {
        RefreshDecision::NotDue {
            days_since: days,
            next_due_at: last + policy.threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshStatus {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh_at: Option<OffsetDateTime>,
    pub threshold_days: u32,
    pub days_since: Option<f64>,
    pub due: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_due_at: Option<OffsetDateTime>,
}

impl RefreshStatus {
    #[must_use]
    pub fn evaluate(meta: &RefreshMeta, now: OffsetDateTime, policy: &RefreshPolicy) -> Self {
        let decision = evaluate_refresh(meta.last_refresh_at, now, policy);
        Self {
            last_refresh_at: meta.last_refresh_at,
            threshold_days: policy.threshold_days,
            days_since: decision.days_since(),
            due: decision.is_due(),
            next_due_at: meta.last_refresh_at.map(|last| last + policy.threshold()),
        }
    }
}

/// Authorization verdict handed in by the caller's own credential check.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Authorization {
    granted: bool,
}

impl Authorization {
    #[must_use]
    pub fn granted() -> Self {
        Self { granted: true }
    }

    #[must_use]
    pub fn denied() -> Self {
        Self { granted: false }
    }

    #[must_use]
    pub fn from_check(granted: bool) -> Self {
        Self { granted }
    }

    /// # Errors
    /// Returns [`CatalogError::Unauthorized`] when the caller was not granted
    /// access to `operation`.
    pub fn require(self, operation: &str) -> Result<(), CatalogError> {
        if self.granted {
            Ok(())
        } else {
            Err(CatalogError::Unauthorized(format!(
                "{operation} requires an authorized caller"
            )))
        }
    }
}

/// Durable storage for wines, overrides and refresh metadata.
///
/// Multi-row operations are atomic: `upsert_wines` applies every record and
/// the refresh stamp or nothing; `query_wines` and `list_appellations` read
/// one consistent snapshot.
pub trait CatalogStore {
    #[allow(clippy::missing_errors_doc)]
    fn upsert_wine(
        &self,
        input: &WineUpsert,
        source_updated_at: OffsetDateTime,
    ) -> Result<WineRecord, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn upsert_wines(
        &self,
        inputs: &[WineUpsert],
        refreshed_at: OffsetDateTime,
    ) -> Result<usize, CatalogError>;

    /// Same as `upsert_wines`, but commits only when the stored refresh stamp
    /// still equals `observed` inside the write transaction. Returns `None`
    /// and writes nothing when another writer moved the stamp first.
    #[allow(clippy::missing_errors_doc)]
    fn upsert_wines_if_stamp(
        &self,
        inputs: &[WineUpsert],
        refreshed_at: OffsetDateTime,
        observed: Option<OffsetDateTime>,
    ) -> Result<Option<usize>, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn get_wine(&self, id: WineId) -> Result<Option<WineRecord>, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn get_wine_by_external_id(&self, external_id: &str)
        -> Result<Option<WineRecord>, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn delete_wine(&self, id: WineId) -> Result<bool, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn get_override(&self, wine_id: WineId) -> Result<Option<OverrideRecord>, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn set_override(
        &self,
        wine_id: WineId,
        adjustment_percent: f64,
        updated_at: OffsetDateTime,
    ) -> Result<OverrideRecord, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn clear_override(&self, wine_id: WineId) -> Result<bool, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn query_wines(
        &self,
        filter: &WineFilter,
        order: WineOrder,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ScoredWine>, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn list_appellations(&self) -> Result<Vec<AppellationCount>, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn get_refresh_meta(&self) -> Result<RefreshMeta, CatalogError>;

    #[allow(clippy::missing_errors_doc)]
    fn set_refresh_meta(&self, refreshed_at: OffsetDateTime) -> Result<(), CatalogError>;
}

/// Supplies the next source snapshot; `Ok(None)` means no data is available.
pub trait SourceFeed {
    #[allow(clippy::missing_errors_doc)]
    fn fetch_batch(&self) -> Result<Option<Vec<ImportRecord>>, CatalogError>;

    fn label(&self) -> String {
        "source feed".to_string()
    }
}

impl<F> SourceFeed for F
where
    F: Fn() -> Result<Option<Vec<ImportRecord>>, CatalogError>,
{
    fn fetch_batch(&self) -> Result<Option<Vec<ImportRecord>>, CatalogError> {
        self()
    }
}

pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        now_utc()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`CatalogError::Validation`] when parsing fails or an input
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, CatalogError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| CatalogError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(CatalogError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 in UTC.
///
/// # Errors
/// Returns [`CatalogError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, CatalogError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            CatalogError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn days_since(earlier: OffsetDateTime, later: OffsetDateTime) -> f64 {
    if later <= earlier {
        return 0.0;
    }

    let elapsed = later - earlier;
    elapsed.as_seconds_f64() / Duration::DAY.as_seconds_f64()
}
