//! 近期缓存维护：统计、修复、去重、第二数据源补充，以及已解析文件的修复

use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::cache::RecentCacheRepository;
use crate::errors::Result;
use crate::models::{ArchiveRecord, Frame, ListKind, Snapshot, TickerEntry, TickerRecord};
use crate::providers::{QuoteProvider, RetryPolicy, SecondaryProvider};
use crate::util;

const SECONDARY_VOLUME_PERIOD: &str = "10d";
const SECONDARY_PROGRESS_EVERY: usize = 10;

/// 缓存完整性统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheReport {
    pub total: usize,
    pub missing_sector: usize,
    pub missing_industry: usize,
}

pub fn report<C: RecentCacheRepository + ?Sized>(cache: &C) -> CacheReport {
    let entries = cache.entries();
    CacheReport {
        total: entries.len(),
        missing_sector: entries.iter().filter(|r| !r.has_sector()).count(),
        missing_industry: entries.iter().filter(|r| !r.has_industry()).count(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanReport {
    pub before: CacheReport,
    pub after: CacheReport,
    pub incomplete_found: usize,
    pub cleaned: usize,
}

/// 重新查询板块或行业缺失的条目，只有两项都补全时才替换
pub async fn clean<C: RecentCacheRepository + ?Sized>(
    cache: &mut C,
    provider: &dyn QuoteProvider,
    retry: &RetryPolicy,
) -> Result<CleanReport> {
    let before = report(cache);
    let mut entries = cache.entries().to_vec();
    let mut incomplete_found = 0;
    let mut cleaned = 0;

    for entry in entries.iter_mut() {
        if entry.is_resolved() {
            continue;
        }
        incomplete_found += 1;

        let ticker = entry.ticker.clone();
        match retry.run(&ticker, || provider.lookup(&ticker)).await {
            Ok(mut fresh) => {
                fresh.normalize_classification();
                if fresh.is_resolved() {
                    info!("Cleaned {}: {} / {}", ticker, fresh.sector, fresh.industry);
                    *entry = fresh;
                    cleaned += 1;
                } else {
                    info!("{} is still unresolved, keeping cached entry", ticker);
                }
            }
            Err(e) => warn!("Could not clean {}: {}", ticker, e),
        }
    }

    cache.replace_all(entries);
    cache.save()?;

    let after = report(cache);
    info!(
        "Cache clean: {} incomplete, {} cleaned, missing sector {} -> {}, missing industry {} -> {}",
        incomplete_found, cleaned, before.missing_sector, after.missing_sector, before.missing_industry, after.missing_industry
    );

    Ok(CleanReport {
        before,
        after,
        incomplete_found,
        cleaned,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupeReport {
    pub before: usize,
    pub after: usize,
}

/// 合并重复代码：优先保留板块已知的条目，全部未知时保留最后一条
pub fn dedupe<C: RecentCacheRepository + ?Sized>(cache: &mut C) -> Result<DedupeReport> {
    let before = cache.len();
    let mut order: Vec<String> = Vec::new();
    let mut chosen: HashMap<String, TickerRecord> = HashMap::new();

    for record in cache.entries() {
        let key = record.ticker.to_uppercase();
        match chosen.get(&key) {
            None => {
                order.push(key.clone());
                chosen.insert(key, record.clone());
            }
            Some(existing) if existing.has_sector() => {}
            Some(_) => {
                chosen.insert(key, record.clone());
            }
        }
    }

    let entries: Vec<TickerRecord> = order.iter().filter_map(|key| chosen.remove(key)).collect();
    let after = entries.len();
    cache.replace_all(entries);
    cache.save()?;

    info!("Deduplicated recent cache: {} -> {} entries", before, after);
    Ok(DedupeReport { before, after })
}

/// 第二数据源补充范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryMode {
    All,
    /// 只处理缺少成交量字段或值为 null 的条目
    MissingOnly,
}

/// 第二数据源成交量字段的状态统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecondaryStatus {
    pub total: usize,
    pub no_field: usize,
    pub no_value: usize,
    pub valid_value: usize,
}

pub fn secondary_status<C: RecentCacheRepository + ?Sized>(cache: &C) -> SecondaryStatus {
    let mut status = SecondaryStatus::default();
    for record in cache.entries() {
        status.total += 1;
        match record.secondary_ave_volume_10d {
            None => status.no_field += 1,
            Some(None) => status.no_value += 1,
            Some(Some(_)) => status.valid_value += 1,
        }
    }
    status
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecondaryUpdateReport {
    pub attempted: usize,
    pub updated: usize,
    pub dead_tickers: Vec<String>,
}

/// 用第二数据源补充缓存条目，返回仍然失败的代码
pub async fn update_with_secondary_source<C: RecentCacheRepository + ?Sized>(
    cache: &mut C,
    provider: &dyn SecondaryProvider,
    mode: SecondaryMode,
    retry: &RetryPolicy,
) -> Result<SecondaryUpdateReport> {
    let mut entries = cache.entries().to_vec();
    let mut report = SecondaryUpdateReport::default();

    let targets: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, r)| mode == SecondaryMode::All || !matches!(r.secondary_ave_volume_10d, Some(Some(_))))
        .map(|(i, _)| i)
        .collect();
    info!(
        "Updating {} of {} cache entries from {}",
        targets.len(),
        entries.len(),
        provider.name()
    );

    for (n, &i) in targets.iter().enumerate() {
        if n % SECONDARY_PROGRESS_EVERY == 0 {
            info!("Secondary update progress: {}/{}", n, targets.len());
        }
        report.attempted += 1;

        let entry = &mut entries[i];
        let ticker = entry.ticker.clone();

        let volume = retry
            .run(&ticker, || provider.volume_average(&ticker, SECONDARY_VOLUME_PERIOD))
            .await;

        match mode {
            SecondaryMode::All => {
                let quote = retry.run(&ticker, || provider.quote(&ticker)).await;
                let ok = volume.is_ok() && quote.is_ok();

                entry.secondary_ave_volume_10d = Some(volume.ok());
                let quote = quote.unwrap_or_default();
                entry.secondary_last_close = Some(quote.close);
                entry.secondary_52_week_high = Some(quote.high_52);
                entry.secondary_52_week_low = Some(quote.low_52);

                if ok {
                    report.updated += 1;
                } else {
                    report.dead_tickers.push(ticker);
                }
            }
            SecondaryMode::MissingOnly => match volume {
                Ok(v) => {
                    entry.secondary_ave_volume_10d = Some(Some(v));
                    report.updated += 1;
                }
                Err(_) => {
                    if entry.secondary_ave_volume_10d.is_none() {
                        entry.secondary_ave_volume_10d = Some(None);
                    }
                    report.dead_tickers.push(ticker);
                }
            },
        }
    }

    cache.replace_all(entries);
    cache.save()?;

    if !report.dead_tickers.is_empty() {
        warn!("{} tickers could not be updated: {:?}", report.dead_tickers.len(), report.dead_tickers);
    }
    Ok(report)
}

/// 单个文件 1 个月列表中板块/行业缺失的数量
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileCompleteness {
    pub file: String,
    pub date: String,
    pub sectors_missing: usize,
    pub industries_missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedDataReport {
    pub files: Vec<FileCompleteness>,
    pub total_sectors_missing: usize,
    pub total_industries_missing: usize,
}

pub fn report_parsed_data(archive: &[ArchiveRecord]) -> ParsedDataReport {
    let mut report = ParsedDataReport::default();
    for record in archive {
        let mut file = FileCompleteness {
            file: record.file.clone(),
            date: record.date.clone(),
            ..Default::default()
        };
        for kind in ListKind::ALL {
            for ticker in record.snapshot.list(Frame::OneMonth, kind).records() {
                if !ticker.has_sector() {
                    file.sectors_missing += 1;
                }
                if !ticker.has_industry() {
                    file.industries_missing += 1;
                }
            }
        }
        report.total_sectors_missing += file.sectors_missing;
        report.total_industries_missing += file.industries_missing;
        report.files.push(file);
    }
    report
}

/// 修复已解析文件中板块/行业缺失的条目
///
/// 先查近期缓存，`provider` 不为 None 时再查数据源。替换内存中的记录，
/// 并改写磁盘上的已解析文件（只改动匹配的条目）。返回替换的条目数。
pub async fn repair_parsed_files<C: RecentCacheRepository + ?Sized>(
    archive: &mut [ArchiveRecord],
    archive_dir: &Path,
    cache: &C,
    provider: Option<(&dyn QuoteProvider, &RetryPolicy)>,
) -> Result<usize> {
    let mut replaced_total = 0;

    for record in archive.iter_mut() {
        let mut candidates: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for kind in ListKind::ALL {
            for ticker in record.snapshot.list(Frame::OneMonth, kind).records() {
                if !ticker.is_resolved() && seen.insert(ticker.ticker.to_uppercase()) {
                    candidates.push(ticker.ticker.clone());
                }
            }
        }
        if candidates.is_empty() {
            continue;
        }

        let mut fixes: HashMap<String, TickerRecord> = HashMap::new();
        for ticker in &candidates {
            if let Some(cached) = cache.lookup(ticker).filter(|r| r.is_resolved()) {
                fixes.insert(ticker.to_uppercase(), cached.clone());
                continue;
            }
            let Some((provider, retry)) = provider else {
                continue;
            };
            match retry.run(ticker, || provider.lookup(ticker)).await {
                Ok(mut fresh) => {
                    fresh.normalize_classification();
                    if fresh.is_resolved() {
                        fixes.insert(ticker.to_uppercase(), fresh);
                    }
                }
                Err(e) => warn!("Could not repair {} in {}: {}", ticker, record.file, e),
            }
        }
        if fixes.is_empty() {
            continue;
        }

        let replaced = apply_fixes(&mut record.snapshot, &fixes);

        let path = archive_dir.join(&record.file);
        if path.exists() {
            let mut on_disk: Snapshot = util::read_json(&path)?;
            apply_fixes(&mut on_disk, &fixes);
            util::write_json(&path, &on_disk)?;
        } else {
            warn!("Parsed file {} not found, only the loaded copy was repaired", path.display());
        }

        info!("Repaired {} entries in {}", replaced, record.file);
        replaced_total += replaced;
    }

    Ok(replaced_total)
}

fn apply_fixes(snapshot: &mut Snapshot, fixes: &HashMap<String, TickerRecord>) -> usize {
    let mut replaced = 0;
    for frame in Frame::ALL {
        for kind in ListKind::ALL {
            for entry in snapshot.list_mut(frame, kind).tickers.iter_mut() {
                let Some(symbol) = entry.symbol() else {
                    continue;
                };
                if let Some(fix) = fixes.get(&symbol.to_uppercase()) {
                    *entry = TickerEntry::Record(fix.clone());
                    replaced += 1;
                }
            }
        }
    }
    replaced
}
