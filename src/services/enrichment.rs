use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::RecentCacheRepository;
use crate::config::{ArchiveLocation, Config};
use crate::errors::{ArchiveError, Result};
use crate::models::{Frame, ListKind, Snapshot, TickerEntry, TickerRecord};
use crate::providers::{QuoteProvider, RetryPolicy};
use crate::util::{self, SnapshotFileName};

/// 错误日志文件内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub error: bool,
    #[serde(rename = "parsingFile", default, skip_serializing_if = "Option::is_none")]
    pub parsing_file: Option<String>,
    #[serde(rename = "typeKey", default, skip_serializing_if = "Option::is_none")]
    pub type_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(rename = "stockWhereErrorOccurred", default, skip_serializing_if = "Option::is_none")]
    pub stock_where_error_occurred: Option<String>,
}

impl ErrorLogEntry {
    pub fn success() -> Self {
        Self {
            error: false,
            parsing_file: None,
            type_key: None,
            count: None,
            stock_where_error_occurred: None,
        }
    }

    pub fn failure(file: &Path, kind: ListKind, count: usize, ticker: &str) -> Self {
        Self {
            error: true,
            parsing_file: Some(file.display().to_string()),
            type_key: Some(kind.key().to_string()),
            count: Some(count),
            stock_where_error_occurred: Some(ticker.to_string()),
        }
    }
}

/// 固定路径的错误日志，每次写入覆盖
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, entry: &ErrorLogEntry) -> Result<()> {
        util::write_json(&self.path, entry)
    }

    pub fn read(&self) -> Result<ErrorLogEntry> {
        util::read_json(&self.path)
    }
}

/// 补全结果统计
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnrichmentReport {
    pub files_parsed: Vec<PathBuf>,
    pub cache_hits: usize,
    pub staged_hits: usize,
    pub provider_lookups: usize,
}

// 查找单个股票时的失败位置
struct LookupFailure {
    frame: Frame,
    kind: ListKind,
    position: usize,
    ticker: String,
}

/// 将原始快照文件补全为 `_parsed` 文件
pub struct EnrichmentPipeline {
    provider: Arc<dyn QuoteProvider>,
    retry: RetryPolicy,
    error_log: ErrorLog,
    progress_every: usize,
}

impl EnrichmentPipeline {
    pub fn new(provider: Arc<dyn QuoteProvider>, retry: RetryPolicy, error_log: ErrorLog) -> Self {
        Self {
            provider,
            retry,
            error_log,
            progress_every: 25,
        }
    }

    pub fn from_config(config: &Config, provider: Arc<dyn QuoteProvider>) -> Self {
        let retry = RetryPolicy::new(config.retry_attempts, config.retry_backoff).with_call_delay(config.api_delay);
        Self::new(provider, retry, ErrorLog::new(&config.error_log_path)).with_progress_every(config.progress_every)
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// 依次补全文件；任意股票查找失败时写错误日志、保存缓存并终止
    pub async fn run<C: RecentCacheRepository + ?Sized>(
        &self,
        files: &[PathBuf],
        mut cache: Option<&mut C>,
    ) -> Result<EnrichmentReport> {
        let mut report = EnrichmentReport::default();
        if files.is_empty() {
            debug!("No raw files need parsing");
            return Ok(report);
        }

        info!(
            "{} files need to be parsed. This may take a while, progress is logged every {} tickers",
            files.len(),
            self.progress_every
        );

        for file in files {
            let mut snapshot: Snapshot = util::read_json(file)?;
            let mut staged: Vec<TickerRecord> = Vec::new();

            let outcome = self
                .enrich_snapshot(&mut snapshot, cache.as_deref(), &mut staged, &mut report)
                .await;

            // 无论成功与否，先把已经查到的数据写入缓存
            if let Some(cache) = cache.as_deref_mut() {
                for record in staged {
                    cache.upsert(record);
                }
                cache.save()?;
            }

            if let Err(failure) = outcome {
                error!(
                    "Could not retrieve {} ({} {} #{}) while parsing {}, writing error log and stopping",
                    failure.ticker,
                    failure.frame,
                    failure.kind,
                    failure.position,
                    file.display()
                );
                self.error_log.write(&ErrorLogEntry::failure(
                    file,
                    failure.kind,
                    failure.position,
                    &failure.ticker,
                ))?;
                return Err(ArchiveError::EnrichmentAborted {
                    file: util::file_name_of(file),
                    list: format!("{} {}", failure.frame, failure.kind),
                    position: failure.position,
                    ticker: failure.ticker,
                });
            }

            let parsed_path = parsed_sibling(file)?;
            util::write_json(&parsed_path, &snapshot)?;
            self.error_log.write(&ErrorLogEntry::success())?;
            info!("Wrote {}", parsed_path.display());
            report.files_parsed.push(parsed_path);
        }

        info!(
            "Parsed {} files: {} cache hits, {} provider lookups",
            report.files_parsed.len(),
            report.cache_hits,
            report.provider_lookups
        );
        Ok(report)
    }

    // 顺序：所有窗口的新高列表，然后所有窗口的新低列表
    async fn enrich_snapshot<C: RecentCacheRepository + ?Sized>(
        &self,
        snapshot: &mut Snapshot,
        cache: Option<&C>,
        staged: &mut Vec<TickerRecord>,
        report: &mut EnrichmentReport,
    ) -> std::result::Result<(), LookupFailure> {
        let mut staged_index: HashMap<String, usize> = HashMap::new();

        for kind in ListKind::ALL {
            for frame in Frame::ALL {
                let list = snapshot.list_mut(frame, kind);
                info!("{} {} to collect in {}", list.tickers.len(), kind, frame);
                let mut started = Instant::now();

                for (position, entry) in list.tickers.iter_mut().enumerate() {
                    if position > 0 && position % self.progress_every == 0 {
                        info!(
                            "{} tickers updated, {:.1}s since last update",
                            position,
                            started.elapsed().as_secs_f64()
                        );
                        started = Instant::now();
                    }

                    let Some(symbol) = entry.symbol().map(|s| s.to_string()) else {
                        warn!("Entry #{} in {} {} has no symbol, leaving as is", position, frame, kind);
                        continue;
                    };

                    // 先查缓存，再查本文件已获取的数据
                    if let Some(hit) = cache.and_then(|c| c.lookup(&symbol)) {
                        report.cache_hits += 1;
                        *entry = TickerEntry::Record(hit.clone());
                        continue;
                    }
                    if let Some(&i) = staged_index.get(&symbol.to_uppercase()) {
                        report.staged_hits += 1;
                        *entry = TickerEntry::Record(staged[i].clone());
                        continue;
                    }

                    report.provider_lookups += 1;
                    let provider = &self.provider;
                    match self.retry.run(&symbol, || provider.lookup(&symbol)).await {
                        Ok(mut record) => {
                            record.normalize_classification();
                            staged_index.insert(symbol.to_uppercase(), staged.len());
                            staged.push(record.clone());
                            *entry = TickerEntry::Record(record);
                        }
                        Err(e) => {
                            warn!("Lookup for {} failed: {}", symbol, e);
                            return Err(LookupFailure {
                                frame,
                                kind,
                                position,
                                ticker: symbol,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// `<prefix>_<时间戳>.json` -> `<prefix>_<时间戳>_parsed.json`
pub fn parsed_sibling(raw: &Path) -> Result<PathBuf> {
    let name = util::file_name_of(raw);
    let parsed = SnapshotFileName::parse(&name)
        .filter(|f| !f.parsed)
        .ok_or_else(|| ArchiveError::DataError(format!("Not a raw snapshot file: {}", name)))?;
    Ok(raw.with_file_name(parsed.parsed_name()))
}

/// 找出还没有 `_parsed` 兄弟文件的原始快照
pub fn pending_raw_files(location: &ArchiveLocation, prefix: &str) -> Result<Vec<PathBuf>> {
    match location {
        ArchiveLocation::Directory(dir) => {
            let files = util::list_snapshot_files(dir, prefix)?;
            let mut pending = Vec::new();
            for (path, name) in files {
                if name.parsed {
                    continue;
                }
                if !dir.join(name.parsed_name()).exists() {
                    pending.push(path);
                }
            }
            Ok(pending)
        }
        ArchiveLocation::File(file) => {
            let name = util::file_name_of(file);
            match SnapshotFileName::parse(&name) {
                Some(f) if !f.parsed && !file.with_file_name(f.parsed_name()).exists() => Ok(vec![file.clone()]),
                _ => Ok(Vec::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::models::{TickerList, NA};
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn lookup(&self, ticker: &str) -> std::result::Result<TickerRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ticker == "BAD" {
                return Err(ProviderError::permanent("unknown symbol"));
            }
            Ok(TickerRecord::dummy(ticker).with_classification("Technology", ""))
        }
    }

    fn raw_snapshot(highs: &[&str], lows: &[&str]) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.one_month.highs.tickers = highs.iter().map(|s| TickerEntry::Symbol(s.to_string())).collect();
        snapshot.one_month.highs.total = highs.len() as i64;
        snapshot.three_month.lows = TickerList {
            total: lows.len() as i64,
            tickers: lows.iter().map(|s| TickerEntry::Symbol(s.to_string())).collect(),
            ..Default::default()
        };
        snapshot
    }

    #[test]
    fn test_pending_raw_files_skips_parsed_pairs() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "bc-high-lows_20220104100000.json",
            "bc-high-lows_20220104100000_parsed.json",
            "bc-high-lows_20220105100000.json",
        ] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }

        let location = ArchiveLocation::Directory(dir.path().to_path_buf());
        let pending = pending_raw_files(&location, "bc-high-lows").unwrap();
        assert_eq!(pending, vec![dir.path().join("bc-high-lows_20220105100000.json")]);

        let single = ArchiveLocation::File(dir.path().join("bc-high-lows_20220104100000.json"));
        assert!(pending_raw_files(&single, "bc-high-lows").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_within_file_hit_staging() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("bc-high-lows_20220104100000.json");
        util::write_json(&raw, &raw_snapshot(&["AAPL", "MSFT"], &["AAPL"])).unwrap();

        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let pipeline = EnrichmentPipeline::new(
            provider.clone(),
            RetryPolicy::new(3, Duration::ZERO),
            ErrorLog::new(dir.path().join("errorLog.json")),
        );

        let report = pipeline.run::<InMemoryCache>(&[raw.clone()], None).await.unwrap();
        assert_eq!(report.provider_lookups, 2);
        assert_eq!(report.staged_hits, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let parsed: Snapshot = util::read_json(&parsed_sibling(&raw).unwrap()).unwrap();
        let record = parsed.list(Frame::ThreeMonth, ListKind::Lows).records().next().unwrap().clone();
        assert_eq!(record.ticker, "AAPL");
        assert_eq!(record.industry, NA);
        assert_eq!(pipeline.error_log().read().unwrap(), ErrorLogEntry::success());
    }

    #[tokio::test]
    async fn test_permanent_failure_aborts_and_logs_position() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("bc-high-lows_20220104100000.json");
        util::write_json(&raw, &raw_snapshot(&["AAPL", "BAD"], &[])).unwrap();

        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let pipeline = EnrichmentPipeline::new(
            provider,
            RetryPolicy::new(10, Duration::ZERO),
            ErrorLog::new(dir.path().join("errorLog.json")),
        );
        let mut cache = InMemoryCache::new();

        let err = pipeline.run(&[raw.clone()], Some(&mut cache)).await.unwrap_err();
        match err {
            ArchiveError::EnrichmentAborted { position, ticker, .. } => {
                assert_eq!(position, 1);
                assert_eq!(ticker, "BAD");
            }
            other => panic!("unexpected error: {}", other),
        }

        let log = pipeline.error_log().read().unwrap();
        assert!(log.error);
        assert_eq!(log.type_key.as_deref(), Some("highs"));
        assert_eq!(log.count, Some(1));
        assert!(cache.lookup("AAPL").is_some());
        assert_eq!(cache.save_count(), 1);
        assert!(!parsed_sibling(&raw).unwrap().exists());
    }
}
