use highlow_archive::cache::{maintenance, JsonFileCache, RecentCacheRepository};
use highlow_archive::config::{Config, ValidationPolicy};
use highlow_archive::data_provider::HighLowDataProvider;
use highlow_archive::models::Frame;
use highlow_archive::providers::{HttpQuoteProvider, HttpSecondaryProvider, QuoteProvider, RetryPolicy, SectorIndustryMap};
use highlow_archive::services::{DateSelection, FrameSelection, ListSelection, NameFilter, Query, SummaryKind};
use highlow_archive::util;

use anyhow::{anyhow, bail, Context};
use clap::{App, Arg, ArgMatches, SubCommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let app = App::new("highlow_archive")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Archive of stocks making new highs and lows")
        .arg(
            Arg::with_name("archive-dir")
                .short('d')
                .long("archive-dir")
                .value_name("DIR")
                .help("Directory containing the snapshot files")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("archive-file")
                .long("archive-file")
                .value_name("FILE")
                .help("Single snapshot file")
                .takes_value(true)
                .conflicts_with("archive-dir")
                .global(true),
        )
        .arg(
            Arg::with_name("prefix")
                .long("prefix")
                .value_name("PREFIX")
                .help("Snapshot file name prefix")
                .takes_value(true)
                .default_value("bc-high-lows")
                .global(true),
        )
        .arg(
            Arg::with_name("recent-cache")
                .long("recent-cache")
                .help("Use the recent cache next to the archive directory")
                .takes_value(false)
                .global(true),
        )
        .arg(
            Arg::with_name("cache")
                .long("cache")
                .value_name("FILE")
                .help("Recent cache file (defaults to the one next to the archive directory)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("quote-url")
                .long("quote-url")
                .value_name("URL")
                .help("Base URL of the quote service")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("start")
                .long("start")
                .value_name("DATE")
                .help("First date to load (inclusive)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("end")
                .long("end")
                .value_name("DATE")
                .help("Last date to load (inclusive)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("date-format")
                .long("date-format")
                .value_name("FORMAT")
                .help("Format of --start, --end and --dates")
                .takes_value(true)
                .default_value("%Y%m%d")
                .global(true),
        )
        .arg(
            Arg::with_name("remove-shell")
                .long("remove-shell")
                .help("Drop shell companies before building summaries")
                .takes_value(false)
                .global(true),
        )
        .arg(
            Arg::with_name("strict")
                .long("strict")
                .help("Abort on duplicate dates and frame data errors")
                .takes_value(false)
                .global(true),
        )
        .arg(
            Arg::with_name("vocabulary")
                .long("vocabulary")
                .value_name("CSV")
                .help("sector,industry CSV used to correct filter names")
                .takes_value(true)
                .global(true),
        );

    // 添加子命令
    let app = app
        .subcommand(
            SubCommand::with_name("parse")
                .about("Enrich raw snapshot files that have no parsed sibling")
                .arg(
                    Arg::with_name("clean-cache")
                        .long("clean-cache")
                        .help("Re-query incomplete recent cache entries first")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("retry-attempts")
                        .long("retry-attempts")
                        .value_name("N")
                        .takes_value(true)
                        .default_value("10"),
                )
                .arg(
                    Arg::with_name("retry-backoff")
                        .long("retry-backoff")
                        .value_name("SECONDS")
                        .takes_value(true)
                        .default_value("30"),
                )
                .arg(
                    Arg::with_name("api-delay")
                        .long("api-delay")
                        .value_name("MILLIS")
                        .help("Fixed delay before every provider call")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("error-log")
                        .long("error-log")
                        .value_name("FILE")
                        .takes_value(true)
                        .default_value("errorLog.json"),
                ),
        )
        .subcommand(
            SubCommand::with_name("report")
                .about("Report completeness of the recent cache and parsed files")
                .arg(
                    Arg::with_name("repair")
                        .long("repair")
                        .help("Repair n/a sectors and industries in parsed files")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("cache-only")
                        .long("cache-only")
                        .help("Only use the recent cache when repairing")
                        .takes_value(false),
                ),
        )
        .subcommand(SubCommand::with_name("clean-cache").about("Re-query incomplete recent cache entries"))
        .subcommand(SubCommand::with_name("dedupe-cache").about("Remove duplicate recent cache entries"))
        .subcommand(
            SubCommand::with_name("update-cache")
                .about("Add secondary source fields to the recent cache")
                .arg(
                    Arg::with_name("secondary-url")
                        .long("secondary-url")
                        .value_name("URL")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("missing-only")
                        .long("missing-only")
                        .help("Only entries without a volume value")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("status-only")
                        .long("status-only")
                        .help("Only report field status")
                        .takes_value(false),
                ),
        )
        .subcommand(
            SubCommand::with_name("query")
                .about("List unique tickers matching the filters")
                .args(filter_args()),
        )
        .subcommand(
            SubCommand::with_name("series")
                .about("Sector or industry high/low series")
                .args(filter_args())
                .arg(
                    Arg::with_name("kind")
                        .long("kind")
                        .value_name("KIND")
                        .help("sector or industry")
                        .takes_value(true)
                        .default_value("sector"),
                ),
        );

    let matches = app.get_matches();
    // 全局参数会传递到子命令
    let Some((command, sub)) = matches.subcommand() else {
        info!("No command specified. Use --help for usage information.");
        return Ok(());
    };
    let config = base_config(sub)?;

    match command {
        "parse" => {
            let retry_attempts = sub.value_of("retry-attempts").unwrap_or("10").parse::<usize>()?;
            let retry_backoff = sub.value_of("retry-backoff").unwrap_or("30").parse::<u64>()?;
            let api_delay = sub
                .value_of("api-delay")
                .map(|v| v.parse::<u64>().map(Duration::from_millis))
                .transpose()?;

            let config = config
                .with_clean_recent_cache(sub.is_present("clean-cache"))
                .with_retry_attempts(retry_attempts)
                .with_retry_backoff(Duration::from_secs(retry_backoff))
                .with_api_delay(api_delay)
                .with_error_log_path(sub.value_of("error-log").unwrap_or("errorLog.json"));

            let quote = quote_provider(sub)?;
            match HighLowDataProvider::open(config, quote).await {
                Ok(provider) => {
                    let report = provider.enrichment_report();
                    info!(
                        "Parsed {} files ({} cache hits, {} provider lookups), {} days loaded",
                        report.files_parsed.len(),
                        report.cache_hits,
                        report.provider_lookups,
                        provider.dates().len()
                    );
                }
                Err(e) => {
                    error!("{}", e);
                    return Err(e).context("enrichment stopped, see the error log");
                }
            }
        }
        "report" => {
            let mut provider = HighLowDataProvider::load(config.with_recent_cache(true))?;
            if let Some(cache) = provider.recent_cache() {
                let r = maintenance::report(cache);
                info!(
                    "Recent cache: {} entries, {} missing sector, {} missing industry",
                    r.total, r.missing_sector, r.missing_industry
                );
                let s = maintenance::secondary_status(cache);
                info!(
                    "Secondary volume: {} no field, {} no value, {} valid",
                    s.no_field, s.no_value, s.valid_value
                );
            }

            let parsed = provider.report_parsed_data();
            for file in &parsed.files {
                info!(
                    "{} ({}): sector n/a {}, industry n/a {}",
                    file.file, file.date, file.sectors_missing, file.industries_missing
                );
            }
            info!(
                "Total: sector n/a {}, industry n/a {}",
                parsed.total_sectors_missing, parsed.total_industries_missing
            );

            if sub.is_present("repair") {
                let retry = RetryPolicy::new(3, Duration::from_secs(10));
                let replaced = if sub.is_present("cache-only") {
                    provider.repair_parsed_files(None).await?
                } else {
                    let quote = quote_provider(sub)?;
                    provider.repair_parsed_files(Some((quote.as_ref(), &retry))).await?
                };
                info!("Replaced {} entries in parsed files", replaced);
            }
        }
        "clean-cache" => {
            let mut cache = open_cache(sub, &config)?;
            let quote = quote_provider(sub)?;
            let retry = RetryPolicy::new(config.retry_attempts, config.retry_backoff);
            let report = maintenance::clean(&mut cache, quote.as_ref(), &retry).await?;
            info!(
                "Found {} incomplete entries, cleaned {}; missing sector {} -> {}, missing industry {} -> {}",
                report.incomplete_found,
                report.cleaned,
                report.before.missing_sector,
                report.after.missing_sector,
                report.before.missing_industry,
                report.after.missing_industry
            );
        }
        "dedupe-cache" => {
            let mut cache = open_cache(sub, &config)?;
            let report = maintenance::dedupe(&mut cache)?;
            info!("Recent cache entries: {} -> {}", report.before, report.after);
        }
        "update-cache" => {
            let mut cache = open_cache(sub, &config)?;
            if !sub.is_present("status-only") {
                let url = sub
                    .value_of("secondary-url")
                    .ok_or_else(|| anyhow!("--secondary-url is required unless --status-only is given"))?;
                let secondary = HttpSecondaryProvider::new(url)?;
                let mode = if sub.is_present("missing-only") {
                    maintenance::SecondaryMode::MissingOnly
                } else {
                    maintenance::SecondaryMode::All
                };
                let retry = RetryPolicy::new(3, Duration::from_secs(10));
                let report = maintenance::update_with_secondary_source(&mut cache, &secondary, mode, &retry).await?;
                info!("Updated {} entries, dead tickers: {:?}", report.updated, report.dead_tickers);
            }
            let s = maintenance::secondary_status(&cache);
            info!(
                "{} entries: {} no field, {} no value, {} valid",
                s.total, s.no_field, s.no_value, s.valid_value
            );
        }
        "query" => {
            let provider = load_for_query(config, sub)?;
            let query = build_query(sub)?;
            let result = provider.stock_list(&query);
            println!("{}", serde_json::to_string_pretty(&result.symbols)?);
        }
        "series" => {
            let provider = load_for_query(config, sub)?;
            let query = build_query(sub)?;
            let kind = match sub.value_of("kind").unwrap_or("sector").to_lowercase().as_str() {
                "sector" => SummaryKind::Sector,
                "industry" => SummaryKind::Industry,
                other => bail!("Unknown series kind: {}", other),
            };
            let names = match kind {
                SummaryKind::Sector => query.sectors.clone(),
                SummaryKind::Industry => query.industries.clone(),
            };
            let series = provider.summary_series(kind, &names, &query);
            println!("{}", serde_json::to_string_pretty(&series)?);
        }
        other => bail!("Unknown command: {}", other),
    }

    Ok(())
}

fn filter_args<'a>() -> Vec<Arg<'a>> {
    vec![
        Arg::with_name("frame")
            .short('f')
            .long("frame")
            .value_name("FRAME")
            .help("1, 3, 6 or 12 (month); repeat for several")
            .takes_value(true)
            .multiple_occurrences(true),
        Arg::with_name("type")
            .short('t')
            .long("type")
            .value_name("TYPE")
            .help("high, low or both")
            .takes_value(true)
            .default_value("both"),
        Arg::with_name("sector")
            .long("sector")
            .value_name("SECTOR")
            .takes_value(true)
            .multiple_occurrences(true),
        Arg::with_name("industry")
            .long("industry")
            .value_name("INDUSTRY")
            .takes_value(true)
            .multiple_occurrences(true),
        Arg::with_name("dates")
            .long("dates")
            .value_name("DATE")
            .help("Only these dates")
            .takes_value(true)
            .multiple_occurrences(true),
    ]
}

fn base_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let date_format = matches.value_of("date-format").unwrap_or("%Y%m%d");
    let start = matches
        .value_of("start")
        .map(|d| util::normalize_date(d, date_format))
        .transpose()?;
    let end = matches
        .value_of("end")
        .map(|d| util::normalize_date(d, date_format))
        .transpose()?;

    let mut config = Config::new()
        .with_file_prefix(matches.value_of("prefix").unwrap_or("bc-high-lows"))
        .with_recent_cache(matches.is_present("recent-cache"))
        .with_remove_shell(matches.is_present("remove-shell"))
        .with_date_range(start.as_deref(), end.as_deref());

    if matches.is_present("strict") {
        config = config
            .with_duplicate_dates(ValidationPolicy::Abort)
            .with_frame_errors(ValidationPolicy::Abort);
    }

    if let Some(dir) = matches.value_of("archive-dir") {
        config = config.with_archive_dir(dir);
    } else if let Some(file) = matches.value_of("archive-file") {
        config = config.with_archive_file(file);
    }
    Ok(config)
}

fn quote_provider(matches: &ArgMatches) -> anyhow::Result<Arc<dyn QuoteProvider>> {
    let url = matches
        .value_of("quote-url")
        .ok_or_else(|| anyhow!("--quote-url is required for this command"))?;
    Ok(Arc::new(HttpQuoteProvider::new(url)?))
}

fn open_cache(matches: &ArgMatches, config: &Config) -> anyhow::Result<JsonFileCache> {
    let path = match matches.value_of("cache") {
        Some(path) => PathBuf::from(path),
        None => {
            let parent = config
                .location
                .as_ref()
                .and_then(|l| l.parent_dir())
                .ok_or_else(|| anyhow!("Provide --cache or an archive location"))?;
            util::recent_cache_path(&parent)
        }
    };
    if !path.exists() {
        bail!("Recent cache {} does not exist", path.display());
    }
    let cache = JsonFileCache::open(&path).with_context(|| format!("reading {}", path.display()))?;
    info!("Loaded {} entries from {}", cache.len(), path.display());
    Ok(cache)
}

fn load_for_query(config: Config, matches: &ArgMatches) -> anyhow::Result<HighLowDataProvider> {
    let provider = HighLowDataProvider::load(config)?;
    Ok(match matches.value_of("vocabulary") {
        Some(path) => {
            let map = SectorIndustryMap::from_csv_path(Path::new(path))?;
            provider.with_vocabulary(Arc::new(map))
        }
        None => provider,
    })
}

fn build_query(sub: &ArgMatches) -> anyhow::Result<Query> {
    let frames: Vec<Frame> = match sub.values_of("frame") {
        Some(values) => values.map(|v| v.parse::<Frame>()).collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    let frames = match frames.len() {
        0 => FrameSelection::All,
        1 => FrameSelection::One(frames[0]),
        _ => FrameSelection::Set(frames),
    };

    let lists = match sub.value_of("type").unwrap_or("both").to_lowercase().as_str() {
        "high" | "highs" => ListSelection::High,
        "low" | "lows" => ListSelection::Low,
        "both" => ListSelection::Both,
        other => bail!("Unknown list type: {}", other),
    };

    let names = |key: &str| match sub.values_of(key) {
        Some(values) => NameFilter::Names(values.map(|v| v.to_string()).collect()),
        None => NameFilter::All,
    };

    let date_format = sub.value_of("date-format").unwrap_or("%Y%m%d");
    let dates = match sub.values_of("dates") {
        Some(values) => DateSelection::Dates(
            values
                .map(|d| util::normalize_date(d, date_format))
                .collect::<Result<_, _>>()?,
        ),
        None => DateSelection::All,
    };

    Ok(Query::new()
        .with_dates(dates)
        .with_frames(frames)
        .with_lists(lists)
        .with_sectors(names("sector"))
        .with_industries(names("industry")))
}
