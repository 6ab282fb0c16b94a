use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{self, maintenance, InMemoryCache, JsonFileCache, RecentCacheRepository};
use crate::config::{ArchiveLocation, Config};
use crate::errors::Result;
use crate::models::ArchiveRecord;
use crate::providers::{QuoteProvider, RetryPolicy, SectorVocabulary};
use crate::services::enrichment::{self, EnrichmentPipeline, EnrichmentReport};
use crate::services::loader::{self, ArchiveLoader, LoadReport};
use crate::services::query::{
    unique_tickers, NameFilter, Query, QueryEngine, SummaryKind, SummarySeries, UniqueTickers, WorkingArchive,
};
use crate::services::summary::{SummaryBuilder, Vocabularies};
use crate::util;

/// 新高/新低归档的数据提供者：补全、加载、汇总并提供查询
pub struct HighLowDataProvider {
    config: Config,
    data: Vec<ArchiveRecord>,
    // 索引用于按日期查找
    date_index: HashMap<String, Vec<usize>>,
    vocabularies: Vocabularies,
    load_report: LoadReport,
    enrichment_report: EnrichmentReport,
    recent_cache: Option<JsonFileCache>,
    query_engine: QueryEngine,
}

impl HighLowDataProvider {
    /// 使用已加载的数据创建实例
    pub fn new_with_data(config: Config, data: Vec<ArchiveRecord>) -> Self {
        let mut provider = Self {
            config,
            data,
            date_index: HashMap::new(),
            vocabularies: Vocabularies::default(),
            load_report: LoadReport::default(),
            enrichment_report: EnrichmentReport::default(),
            recent_cache: None,
            query_engine: QueryEngine::new(),
        };
        provider.build_summaries();
        provider.rebuild_indices();
        provider
    }

    /// 只加载已有文件，不调用数据源
    pub fn load(config: Config) -> Result<Self> {
        let recent_cache = open_recent_cache(&config)?;
        Self::finish_loading(config, recent_cache, EnrichmentReport::default())
    }

    /// 完整流程：整理近期缓存，补全未解析的文件，然后加载
    pub async fn open(config: Config, quote: Arc<dyn QuoteProvider>) -> Result<Self> {
        let mut recent_cache = open_recent_cache(&config)?;
        let retry = RetryPolicy::new(config.retry_attempts, config.retry_backoff).with_call_delay(config.api_delay);

        if config.clean_recent_cache {
            match recent_cache.as_mut() {
                Some(cache) => {
                    maintenance::clean(cache, quote.as_ref(), &retry).await?;
                }
                None => warn!("clean_recent_cache requires the recent cache to be enabled"),
            }
        }

        let mut enrichment_report = EnrichmentReport::default();
        if !config.raw_only {
            if let Some(location) = &config.location {
                let pending = enrichment::pending_raw_files(location, &config.file_prefix)?;
                let pipeline = EnrichmentPipeline::from_config(&config, quote.clone());
                enrichment_report = pipeline.run(&pending, recent_cache.as_mut()).await?;
            }
        }

        Self::finish_loading(config, recent_cache, enrichment_report)
    }

    fn finish_loading(
        config: Config,
        recent_cache: Option<JsonFileCache>,
        enrichment_report: EnrichmentReport,
    ) -> Result<Self> {
        let (data, load_report) = if config.location.is_some() {
            ArchiveLoader::new(&config).load()?
        } else {
            warn!("No archive directory or file provided, only limited features are available");
            (Vec::new(), LoadReport::default())
        };

        let mut provider = Self {
            config,
            data,
            date_index: HashMap::new(),
            vocabularies: Vocabularies::default(),
            load_report,
            enrichment_report,
            recent_cache,
            query_engine: QueryEngine::new(),
        };
        provider.build_summaries();
        provider.rebuild_indices();
        Ok(provider)
    }

    /// 设置板块/行业词表，用于纠正查询条件的大小写
    pub fn with_vocabulary(mut self, vocabulary: Arc<dyn SectorVocabulary + Send + Sync>) -> Self {
        self.query_engine = self.query_engine.with_vocabulary(vocabulary);
        self
    }

    fn build_summaries(&mut self) {
        if self.config.raw_only || self.config.parse_only {
            return;
        }
        self.vocabularies = SummaryBuilder::build(&mut self.data);
        info!(
            "{} sectors and {} industries in archive",
            self.vocabularies.all_sectors.len(),
            self.vocabularies.all_industries.len()
        );
    }

    fn rebuild_indices(&mut self) {
        self.date_index.clear();
        for (i, record) in self.data.iter().enumerate() {
            self.date_index.entry(record.date.clone()).or_default().push(i);
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 获取所有已加载的记录
    pub fn records(&self) -> &[ArchiveRecord] {
        &self.data
    }

    /// 按加载顺序返回日期
    pub fn dates(&self) -> Vec<&str> {
        self.data.iter().map(|r| r.date.as_str()).collect()
    }

    /// 获取指定日期的记录（有重复日期时返回多条）
    pub fn get_day(&self, date: &str) -> Vec<&ArchiveRecord> {
        self.date_index
            .get(date)
            .map(|indices| indices.iter().map(|&i| &self.data[i]).collect())
            .unwrap_or_default()
    }

    pub fn vocabularies(&self) -> &Vocabularies {
        &self.vocabularies
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn enrichment_report(&self) -> &EnrichmentReport {
        &self.enrichment_report
    }

    pub fn recent_cache(&self) -> Option<&JsonFileCache> {
        self.recent_cache.as_ref()
    }

    pub fn recent_cache_mut(&mut self) -> Option<&mut JsonFileCache> {
        self.recent_cache.as_mut()
    }

    pub fn select(&self, query: &Query) -> WorkingArchive {
        self.query_engine.select(&self.data, query)
    }

    pub fn stock_list(&self, query: &Query) -> UniqueTickers {
        self.query_engine.stock_list(&self.data, query)
    }

    /// 整个归档去重后的股票
    pub fn unique_tickers(&self) -> UniqueTickers {
        unique_tickers(&self.select(&Query::new()))
    }

    pub fn summary_series(&self, kind: SummaryKind, names: &NameFilter, query: &Query) -> SummarySeries {
        let working = self.select(query);
        self.query_engine.summary_series(&working, kind, names, &self.vocabularies)
    }

    pub fn report_parsed_data(&self) -> maintenance::ParsedDataReport {
        maintenance::report_parsed_data(&self.data)
    }

    /// 修复已解析文件中缺失的板块/行业，完成后重新汇总
    pub async fn repair_parsed_files(&mut self, provider: Option<(&dyn QuoteProvider, &RetryPolicy)>) -> Result<usize> {
        let Some(dir) = archive_dir(&self.config) else {
            warn!("No archive location configured, nothing to repair");
            return Ok(0);
        };

        let replaced = match &self.recent_cache {
            Some(cache) => maintenance::repair_parsed_files(&mut self.data, &dir, cache, provider).await?,
            None => maintenance::repair_parsed_files(&mut self.data, &dir, &InMemoryCache::new(), provider).await?,
        };

        if replaced > 0 {
            self.build_summaries();
        }
        Ok(replaced)
    }
}

fn archive_dir(config: &Config) -> Option<PathBuf> {
    match config.location.as_ref()? {
        ArchiveLocation::Directory(dir) => Some(dir.clone()),
        ArchiveLocation::File(file) => file.parent().map(|p| p.to_path_buf()),
    }
}

/// 打开近期缓存；缓存文件不存在时用最新的已解析文件填充
fn open_recent_cache(config: &Config) -> Result<Option<JsonFileCache>> {
    if !config.use_recent_cache {
        return Ok(None);
    }
    let Some(location) = config.location.as_ref() else {
        warn!("Recent cache requires an archive location");
        return Ok(None);
    };
    let Some(parent) = location.parent_dir() else {
        warn!("Archive location has no parent directory, recent cache disabled");
        return Ok(None);
    };

    let path = util::recent_cache_path(&parent);
    let mut recent_cache = JsonFileCache::open(&path)?;
    if !recent_cache.exists() {
        if let Some(latest) = latest_parsed_file(location, &config.file_prefix)? {
            warn!(
                "Recent cache not found at {}, seeding it from {}",
                path.display(),
                latest.display()
            );
            let record = loader::load_file(&latest)?;
            let seeded = cache::seed_from_snapshot(&mut recent_cache, &record.snapshot);
            recent_cache.save()?;
            info!("Seeded recent cache with {} entries", seeded);
        }
    }
    info!("Using recent cache {} ({} entries)", path.display(), recent_cache.len());
    Ok(Some(recent_cache))
}

fn latest_parsed_file(location: &ArchiveLocation, prefix: &str) -> Result<Option<PathBuf>> {
    match location {
        ArchiveLocation::Directory(dir) => Ok(util::list_snapshot_files(dir, prefix)?
            .into_iter()
            .filter(|(_, name)| name.parsed)
            .map(|(path, _)| path)
            .last()),
        ArchiveLocation::File(file) => {
            let parsed = util::SnapshotFileName::parse(&util::file_name_of(file)).map_or(false, |n| n.parsed);
            Ok(if parsed && file.exists() { Some(file.clone()) } else { None })
        }
    }
}
