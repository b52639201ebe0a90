//! `vinorank` command surface.
//!
//! [`run_cli`] resolves settings, opens the catalog and dispatches one
//! command. With `--json` every command prints one envelope carrying
//! [`CONTRACT_VERSION`]; logs always go to stderr.

mod config;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::debug;
use vinorank_core::{
    format_rfc3339, AppellationCount, Authorization, CatalogError, IngestReport, OverrideRecord,
    RankWindow, RankedWine, RefreshStatus, ScoredWine, SystemClock, WineFilter, WineId,
};
use vinorank_engine::{Catalog, RefreshOutcome};
use vinorank_import::{parse_path, FileFeed};
use vinorank_store_sqlite::SqliteCatalogStore;

pub use config::{FileConfig, Settings, SettingsInput, DEFAULT_CONFIG_PATH, DEFAULT_DB_PATH};

pub const CONTRACT_VERSION: &str = "vinorank.cli.v1";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str =
    "warn,vinorank_cli=info,vinorank_engine=info,vinorank_import=info,vinorank_store_sqlite=info";

#[derive(Debug, Parser)]
#[command(name = "vinorank")]
#[command(about = "Wine catalog ranking with bounded manual adjustments")]
#[command(version)]
pub struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = "VINORANK_DB")]
    db: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true, env = "VINORANK_CONFIG")]
    config: Option<PathBuf>,

    /// Token authorizing mutating commands
    #[arg(long, global = true, env = "VINORANK_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Staleness threshold in days
    #[arg(long, global = true, env = "VINORANK_THRESHOLD_DAYS")]
    threshold_days: Option<u32>,

    /// Print JSON envelopes instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List appellations with wine counts
    Appellations,
    /// Ranked list, per appellation or global
    Rank(RankArgs),
    Wine {
        #[command(subcommand)]
        command: WineCommand,
    },
    Override {
        #[command(subcommand)]
        command: OverrideCommand,
    },
    /// Ingest a CSV or JSON payload
    Import(ImportArgs),
    Refresh {
        #[command(subcommand)]
        command: RefreshCommand,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OrderArg {
    Ranked,
    Name,
}

#[derive(Debug, Args)]
pub struct RankArgs {
    #[arg(long)]
    appellation: Option<String>,
    /// Case-insensitive match on name or producer
    #[arg(long)]
    query: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    min_score: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    max_score: Option<f64>,
    #[arg(long, conflicts_with = "all")]
    limit: Option<usize>,
    /// Return every match
    #[arg(long)]
    all: bool,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, value_enum, default_value_t = OrderArg::Ranked)]
    order: OrderArg,
}

#[derive(Debug, Subcommand)]
pub enum WineCommand {
    Show(WineShowArgs),
    Delete(WineDeleteArgs),
}

#[derive(Debug, Args)]
pub struct WineShowArgs {
    #[arg(long, conflicts_with = "external_id", required_unless_present = "external_id")]
    id: Option<String>,
    #[arg(long)]
    external_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct WineDeleteArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Subcommand)]
pub enum OverrideCommand {
    Set(OverrideSetArgs),
    Clear(OverrideClearArgs),
}

#[derive(Debug, Args)]
pub struct OverrideSetArgs {
    #[arg(long)]
    wine_id: String,
    /// Adjustment in [-25, 25]
    #[arg(long, allow_negative_numbers = true)]
    percent: f64,
}

#[derive(Debug, Args)]
pub struct OverrideClearArgs {
    #[arg(long)]
    wine_id: String,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum RefreshCommand {
    Status,
    /// Refresh from the feed only when the catalog is stale; `--feed`
    /// requires the admin token
    Check(FeedArgs),
    /// Refresh from the feed unconditionally
    Now(FeedArgs),
}

#[derive(Debug, Args)]
pub struct FeedArgs {
    /// Feed file; overrides `[refresh] feed_path`
    #[arg(long)]
    feed: Option<PathBuf>,
}

type SqliteCatalog = Catalog<SqliteCatalogStore, SystemClock>;

/// Runs one parsed invocation.
///
/// # Errors
/// Returns an error when settings are invalid, the database cannot be
/// opened, or the command itself fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let input = SettingsInput {
        db: cli.db,
        config: cli.config,
        threshold_days: cli.threshold_days,
    };
    let settings = Settings::resolve(&input)?;
    let auth = settings.authorize(cli.admin_token.as_deref());
    debug!(db = %settings.db_path.display(), "opening catalog");

    let store = SqliteCatalogStore::open(&settings.db_path)
        .with_context(|| format!("failed to open catalog at {}", settings.db_path.display()))?;
    store.migrate().context("failed to migrate catalog schema")?;
    let catalog = Catalog::new(store, SystemClock, settings.policy)?;

    let output = Output { json: cli.json };
    run_command(&catalog, auth, &settings, cli.command, output)
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn envelope(self, command: &str, data: Value) -> Result<()> {
        let payload = json!({
            "contract_version": CONTRACT_VERSION,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        Ok(())
    }
}

fn run_command(
    catalog: &SqliteCatalog,
    auth: Authorization,
    settings: &Settings,
    command: Command,
    output: Output,
) -> Result<()> {
    match command {
        Command::Appellations => {
            let appellations = catalog.list_appellations()?;
            if output.json {
                return output.envelope("appellations", serde_json::to_value(&appellations)?);
            }
            print_appellations(&appellations);
            Ok(())
        }
        Command::Rank(args) => run_rank(catalog, args, output),
        Command::Wine { command } => run_wine(catalog, auth, command, output),
        Command::Override { command } => run_override(catalog, auth, command, output),
        Command::Import(args) => {
            let records = parse_path(&args.file)
                .with_context(|| format!("failed to load import file {}", args.file.display()))?;
            let report = catalog.ingest(auth, &records)?;
            if output.json {
                return output.envelope("import", serde_json::to_value(&report)?);
            }
            print_ingest_report(&report)
        }
        Command::Refresh { command } => run_refresh(catalog, auth, settings, command, output),
    }
}

fn run_rank(catalog: &SqliteCatalog, args: RankArgs, output: Output) -> Result<()> {
    let filter = WineFilter {
        appellation: args.appellation,
        query: args.query,
        min_score: args.min_score,
        max_score: args.max_score,
    };
    let window = match (args.all, args.limit) {
        (true, _) => RankWindow::Unbounded,
        (false, Some(limit)) => RankWindow::Limit(limit),
        (false, None) => RankWindow::Default,
    };

    let wines = match args.order {
        OrderArg::Ranked => catalog.rank(&filter, window, args.offset)?,
        OrderArg::Name => catalog.browse(&filter, window, args.offset)?,
    };

    if output.json {
        return output.envelope(
            "rank",
            json!({
                "filter": filter,
                "limit": window.resolve(&filter.normalized()),
                "offset": args.offset,
                "wines": wines,
            }),
        );
    }
    print_ranked(&wines);
    Ok(())
}

fn run_wine(
    catalog: &SqliteCatalog,
    auth: Authorization,
    command: WineCommand,
    output: Output,
) -> Result<()> {
    match command {
        WineCommand::Show(args) => {
            let found = match (args.id, args.external_id) {
                (Some(id), _) => catalog.wine(parse_wine_id(&id)?)?,
                (None, Some(external_id)) => catalog.wine_by_external_id(&external_id)?,
                (None, None) => return Err(anyhow!("either --id or --external-id is required")),
            };
            let wine = found.ok_or_else(|| CatalogError::NotFound("wine".to_string()))?;
            if output.json {
                return output.envelope("wine.show", serde_json::to_value(&wine)?);
            }
            print_wine(&wine)
        }
        WineCommand::Delete(args) => {
            let id = parse_wine_id(&args.id)?;
            if !catalog.delete_wine(auth, id)? {
                return Err(CatalogError::NotFound(format!("wine {id}")).into());
            }
            if output.json {
                return output.envelope("wine.delete", json!({ "wine_id": id, "deleted": true }));
            }
            println!("deleted wine {id}");
            Ok(())
        }
    }
}

fn run_override(
    catalog: &SqliteCatalog,
    auth: Authorization,
    command: OverrideCommand,
    output: Output,
) -> Result<()> {
    match command {
        OverrideCommand::Set(args) => {
            let record = catalog.set_override(auth, parse_wine_id(&args.wine_id)?, args.percent)?;
            if output.json {
                return output.envelope("override.set", serde_json::to_value(&record)?);
            }
            print_override(&record)
        }
        OverrideCommand::Clear(args) => {
            let wine_id = parse_wine_id(&args.wine_id)?;
            let cleared = catalog.clear_override(auth, wine_id)?;
            if output.json {
                return output.envelope(
                    "override.clear",
                    json!({ "wine_id": wine_id, "cleared": cleared }),
                );
            }
            println!(
                "wine {wine_id}: {}",
                if cleared { "override cleared" } else { "no override set" }
            );
            Ok(())
        }
    }
}

fn run_refresh(
    catalog: &SqliteCatalog,
    auth: Authorization,
    settings: &Settings,
    command: RefreshCommand,
    output: Output,
) -> Result<()> {
    let (name, outcome) = match command {
        RefreshCommand::Status => {
            let status = catalog.refresh_status()?;
            if output.json {
                return output.envelope("refresh.status", serde_json::to_value(&status)?);
            }
            return print_refresh_status(&status);
        }
        RefreshCommand::Check(args) => {
            // The unauthenticated timer path only reads the configured feed.
            if args.feed.is_some() {
                auth.require("refresh check --feed")?;
            }
            let feed = resolve_feed(settings, args)?;
            ("refresh.check", catalog.run_due_check(&feed)?)
        }
        RefreshCommand::Now(args) => {
            let feed = resolve_feed(settings, args)?;
            ("refresh.now", catalog.trigger_refresh_now(auth, &feed)?)
        }
    };

    let payload = outcome_json(&outcome)?;
    if output.json {
        return output.envelope(name, payload);
    }
    print_outcome(&outcome)
}

fn resolve_feed(settings: &Settings, args: FeedArgs) -> Result<FileFeed> {
    args.feed
        .or_else(|| settings.feed_path.clone())
        .map(FileFeed::new)
        .ok_or_else(|| {
            CatalogError::Configuration(
                "no feed configured; pass --feed or set [refresh] feed_path".to_string(),
            )
            .into()
        })
}

fn parse_wine_id(raw: &str) -> Result<WineId> {
    Ok(raw.parse::<WineId>()?)
}

fn outcome_json(outcome: &RefreshOutcome) -> Result<Value> {
    Ok(match outcome {
        RefreshOutcome::Skipped {
            days_since,
            next_due_at,
        } => json!({
            "action": "skipped",
            "days_since": days_since,
            "next_due_at": format_rfc3339(*next_due_at)?,
        }),
        RefreshOutcome::NoData => json!({ "action": "no_data" }),
        RefreshOutcome::Superseded => json!({ "action": "superseded" }),
        RefreshOutcome::Refreshed(report) => json!({
            "action": "refreshed",
            "report": report,
        }),
    })
}

fn print_appellations(appellations: &[AppellationCount]) {
    println!("{:<40} wines", "appellation");
    println!("{}", "-".repeat(48));
    for item in appellations {
        println!("{:<40} {}", item.appellation, item.wine_count);
    }
}

fn print_ranked(wines: &[RankedWine]) {
    println!(
        "{:>4} {:<26} {:<36} {:<20} {:>7} {:>6} {:>7} {:>8} {:>8}",
        "#", "wine_id", "name", "appellation", "vintage", "base", "adj%", "score", "price"
    );
    println!("{}", "-".repeat(132));
    for item in wines {
        let wine = &item.entry.wine;
        println!(
            "{:>4} {:<26} {:<36} {:<20} {:>7} {:>6.2} {:>7.1} {:>8.3} {:>8}",
            item.position,
            wine.id,
            wine.name,
            wine.appellation,
            wine.vintage_year
                .map_or_else(|| "NV".to_string(), |year| year.to_string()),
            wine.base_score,
            item.entry.adjustment_percent(),
            item.entry.effective_score,
            wine.price
                .map_or_else(|| "-".to_string(), |price| format!("{price:.2}")),
        );
    }
}

fn print_wine(scored: &ScoredWine) -> Result<()> {
    let wine = &scored.wine;
    println!("wine_id={} external_id={}", wine.id, wine.external_id);
    println!(
        "name={} producer={} appellation={} vintage={}",
        wine.name,
        wine.producer.as_deref().unwrap_or("n/a"),
        wine.appellation,
        wine.vintage_year
            .map_or_else(|| "NV".to_string(), |year| year.to_string())
    );
    println!(
        "base_score={} adjustment_percent={} effective_score={:.4} review_count={} price={}",
        wine.base_score,
        scored.adjustment_percent(),
        scored.effective_score,
        wine.review_count,
        wine.price
            .map_or_else(|| "n/a".to_string(), |price| format!("{price:.2}"))
    );
    println!(
        "source_updated_at={} updated_at={}",
        format_rfc3339(wine.source_updated_at)?,
        format_rfc3339(wine.updated_at)?
    );
    Ok(())
}

fn print_override(record: &OverrideRecord) -> Result<()> {
    println!(
        "wine {}: adjustment_percent={} updated_at={}",
        record.wine_id,
        record.adjustment_percent,
        format_rfc3339(record.updated_at)?
    );
    Ok(())
}

fn print_ingest_report(report: &IngestReport) -> Result<()> {
    let refreshed_at = match report.refreshed_at {
        Some(at) => format_rfc3339(at)?,
        None => "unchanged".to_string(),
    };
    println!(
        "upserted={} rejected={} refreshed_at={refreshed_at}",
        report.upserted_count,
        report.rejected.len()
    );
    for rejected in &report.rejected {
        println!("  record {}: {}", rejected.index, rejected.reason);
    }
    Ok(())
}

fn print_refresh_status(status: &RefreshStatus) -> Result<()> {
    let last = match status.last_refresh_at {
        Some(at) => format_rfc3339(at)?,
        None => "never".to_string(),
    };
    let next = match status.next_due_at {
        Some(at) => format_rfc3339(at)?,
        None => "now".to_string(),
    };
    println!(
        "last_refresh_at={last} threshold_days={} days_since={} due={} next_due_at={next}",
        status.threshold_days,
        status
            .days_since
            .map_or_else(|| "n/a".to_string(), |days| format!("{days:.2}")),
        if status.due { "yes" } else { "no" },
    );
    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) -> Result<()> {
    match outcome {
        RefreshOutcome::Skipped {
            days_since,
            next_due_at,
        } => {
            println!(
                "refresh not due: days_since={days_since:.2} next_due_at={}",
                format_rfc3339(*next_due_at)?
            );
            Ok(())
        }
        RefreshOutcome::NoData => {
            println!("feed returned no data; catalog unchanged");
            Ok(())
        }
        RefreshOutcome::Superseded => {
            println!("another writer refreshed the catalog first; batch discarded");
            Ok(())
        }
        RefreshOutcome::Refreshed(report) => print_ingest_report(report),
    }
}
