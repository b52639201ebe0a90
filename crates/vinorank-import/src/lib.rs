//! Raw catalog payloads (CSV or JSON) to [`ImportRecord`]s.
//!
//! Column and key names are resolved through [`FIELD_ALIASES`]; matching
//! ignores case as well as `-`, `_` and spaces.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};
use vinorank_core::{CatalogError, ImportRecord, SourceFeed};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV payload: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported payload: {0}")]
    Unsupported(String),
}

impl From<ImportError> for CatalogError {
    fn from(err: ImportError) -> Self {
        CatalogError::Source(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportField {
    ExternalId,
    Name,
    Producer,
    Appellation,
    Vintage,
    BaseScore,
    ReviewCount,
    Price,
}

/// Accepted source names per field, in priority order.
pub const FIELD_ALIASES: &[(ImportField, &[&str])] = &[
    (
        ImportField::ExternalId,
        &["external_id", "externalId", "identifier", "id", "sku"],
    ),
    (ImportField::Name, &["name", "wine", "wine_name", "title"]),
    (
        ImportField::Producer,
        &["producer", "estate", "chateau", "domaine"],
    ),
    (ImportField::Appellation, &["appellation", "aoc", "region"]),
    (
        ImportField::Vintage,
        &["vintage", "vintage_year", "year", "millesime"],
    ),
    (
        ImportField::BaseScore,
        &["base_score", "base_rating", "rating", "score"],
    ),
    (
        ImportField::ReviewCount,
        &["review_count", "reviews", "ratings_count", "num_reviews"],
    ),
    (ImportField::Price, &["price", "price_eur", "prix"]),
];

const JSON_COLLECTION_KEYS: &[&str] = &["wines", "records", "items"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Csv,
    Json,
}

impl PayloadFormat {
    #[must_use]
    pub fn from_extension(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// JSON when the first non-blank character opens an array or object.
    #[must_use]
    pub fn sniff(text: &str) -> Self {
        match text.trim_start_matches('\u{feff}').trim_start().chars().next() {
            Some('[' | '{') => Self::Json,
            _ => Self::Csv,
        }
    }
}

fn alias_key(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

fn build_record(mut value_of: impl FnMut(ImportField) -> Option<String>) -> ImportRecord {
    ImportRecord {
        external_id: value_of(ImportField::ExternalId),
        name: value_of(ImportField::Name),
        producer: value_of(ImportField::Producer),
        appellation: value_of(ImportField::Appellation),
        vintage: value_of(ImportField::Vintage),
        base_score: value_of(ImportField::BaseScore),
        review_count: value_of(ImportField::ReviewCount),
        price: value_of(ImportField::Price),
    }
}

fn aliases_for(field: ImportField) -> &'static [&'static str] {
    match FIELD_ALIASES.iter().find(|(candidate, _)| *candidate == field) {
        Some((_, aliases)) => aliases,
        None => &[],
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Header indices per field, ordered by alias priority.
struct ColumnMap {
    columns: Vec<(ImportField, Vec<usize>)>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let keys = headers.iter().map(alias_key).collect::<Vec<_>>();
        let columns = FIELD_ALIASES
            .iter()
            .map(|(field, aliases)| {
                let indices = aliases
                    .iter()
                    .flat_map(|alias| {
                        let wanted = alias_key(alias);
                        keys.iter()
                            .enumerate()
                            .filter(move |(_, key)| **key == wanted)
                            .map(|(index, _)| index)
                    })
                    .collect::<Vec<_>>();
                (*field, indices)
            })
            .collect();
        Self { columns }
    }

    fn value(&self, field: ImportField, row: &csv::StringRecord) -> Option<String> {
        let (_, indices) = self.columns.iter().find(|(candidate, _)| *candidate == field)?;
        indices
            .iter()
            .filter_map(|index| row.get(*index))
            .find_map(non_blank)
    }

    fn is_empty(&self) -> bool {
        self.columns.iter().all(|(_, indices)| indices.is_empty())
    }
}

/// Parses a headed CSV payload.
///
/// # Errors
/// Returns [`ImportError::Csv`] for unreadable input and
/// [`ImportError::Unsupported`] when no header matches a known field.
pub fn parse_csv(reader: impl Read) -> Result<Vec<ImportRecord>, ImportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = ColumnMap::from_headers(&headers);
    if columns.is_empty() {
        return Err(ImportError::Unsupported(format!(
            "no recognizable columns in CSV header: {}",
            headers.iter().collect::<Vec<_>>().join(",")
        )));
    }

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        records.push(build_record(|field| columns.value(field, &row)));
    }

    debug!(records = records.len(), "parsed CSV payload");
    Ok(records)
}

/// Parses a JSON array of objects, or an object holding one under
/// `wines`, `records` or `items`.
///
/// # Errors
/// Returns [`ImportError::Json`] for malformed JSON and
/// [`ImportError::Unsupported`] for any other document shape.
pub fn parse_json(text: &str) -> Result<Vec<ImportRecord>, ImportError> {
    let document: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))?;
    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut object) => {
            let key = JSON_COLLECTION_KEYS
                .iter()
                .find(|key| matches!(object.get(**key), Some(Value::Array(_))))
                .ok_or_else(|| {
                    ImportError::Unsupported(format!(
                        "JSON object has no array under {}",
                        JSON_COLLECTION_KEYS.join("/")
                    ))
                })?;
            match object.remove(*key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        _ => {
            return Err(ImportError::Unsupported(
                "JSON payload must be an array or an object".to_string(),
            ))
        }
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(object) = item else {
            return Err(ImportError::Unsupported(format!(
                "JSON record {index} is not an object"
            )));
        };
        records.push(build_record(|field| json_value(&object, field)));
    }

    debug!(records = records.len(), "parsed JSON payload");
    Ok(records)
}

fn json_value(object: &Map<String, Value>, field: ImportField) -> Option<String> {
    aliases_for(field).iter().find_map(|alias| {
        let wanted = alias_key(alias);
        object
            .iter()
            .filter(|(key, _)| alias_key(key) == wanted)
            .find_map(|(_, value)| json_scalar(value))
    })
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_blank(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parses in-memory text, picking the format by sniffing.
///
/// # Errors
/// See [`parse_csv`] and [`parse_json`].
pub fn parse_text(text: &str, format: Option<PayloadFormat>) -> Result<Vec<ImportRecord>, ImportError> {
    match format.unwrap_or_else(|| PayloadFormat::sniff(text)) {
        PayloadFormat::Csv => parse_csv(text.as_bytes()),
        PayloadFormat::Json => parse_json(text),
    }
}

/// Reads and parses a payload file; the extension decides the format when
/// it is `.csv` or `.json`.
///
/// # Errors
/// Returns [`ImportError::Io`] when the file cannot be read, otherwise see
/// [`parse_text`].
pub fn parse_path(path: &Path) -> Result<Vec<ImportRecord>, ImportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let records = parse_text(&text, PayloadFormat::from_extension(path))?;
    info!(path = %path.display(), records = records.len(), "loaded import file");
    Ok(records)
}

/// Source feed reading a payload file; a missing file means no data.
#[derive(Debug, Clone)]
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceFeed for FileFeed {
    fn fetch_batch(&self) -> Result<Option<Vec<ImportRecord>>, CatalogError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "feed file absent");
            return Ok(None);
        }
        Ok(Some(parse_path(&self.path)?))
    }

    fn label(&self) -> String {
        format!("file {}", self.path.display())
    }
}
