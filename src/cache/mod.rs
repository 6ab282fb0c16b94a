//! 近期缓存：股票代码 -> 最近一次补全的数据
//!
//! 缓存文件是一个 JSON 数组，每次工作开始时整体读入，在检查点整体写回。
//! 同一缓存文件不支持并发运行。

pub mod maintenance;

use log::{debug, info};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::Result;
use crate::models::{Frame, ListKind, Snapshot, TickerRecord};
use crate::util;

/// 近期缓存仓库接口
pub trait RecentCacheRepository {
    fn load(&mut self) -> Result<()>;

    fn save(&self) -> Result<()>;

    /// 按股票代码查找（忽略大小写）
    fn lookup(&self, ticker: &str) -> Option<&TickerRecord>;

    /// 插入或更新；已有完整行业数据的条目不会被不完整的数据覆盖
    fn upsert(&mut self, record: TickerRecord);

    fn entries(&self) -> &[TickerRecord];

    fn replace_all(&mut self, entries: Vec<TickerRecord>);

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// 条目列表及其索引
#[derive(Debug, Clone, Default)]
struct CacheEntries {
    entries: Vec<TickerRecord>,
    index: HashMap<String, usize>,
}

impl CacheEntries {
    fn new(entries: Vec<TickerRecord>) -> Self {
        let mut cache = Self {
            entries,
            index: HashMap::new(),
        };
        cache.rebuild_index();
        cache
    }

    /// 重建索引；重复代码优先指向板块已知的条目
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, record) in self.entries.iter().enumerate() {
            let key = record.ticker.to_uppercase();
            match self.index.get(&key) {
                Some(&existing) if self.entries[existing].has_sector() || !record.has_sector() => {}
                _ => {
                    self.index.insert(key, i);
                }
            }
        }
    }

    fn lookup(&self, ticker: &str) -> Option<&TickerRecord> {
        self.index.get(&ticker.to_uppercase()).map(|&i| &self.entries[i])
    }

    fn upsert(&mut self, record: TickerRecord) {
        let key = record.ticker.to_uppercase();
        match self.index.get(&key) {
            Some(&i) => {
                let existing = &self.entries[i];
                if (existing.is_resolved() && !record.is_resolved()) || (existing.has_sector() && !record.has_sector()) {
                    debug!("Keeping resolved cache entry for {}", record.ticker);
                    return;
                }
                self.entries[i] = record;
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(record);
            }
        }
    }
}

/// 以单个 JSON 数组文件保存的近期缓存
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
    data: CacheEntries,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: CacheEntries::default(),
        }
    }

    /// 创建并立即读取
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut cache = Self::new(path);
        cache.load()?;
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl RecentCacheRepository for JsonFileCache {
    fn load(&mut self) -> Result<()> {
        let entries = if self.path.exists() {
            util::read_json::<Vec<TickerRecord>>(&self.path)?
        } else {
            info!("No recent cache at {}, starting empty", self.path.display());
            Vec::new()
        };
        debug!("Loaded {} recent cache entries", entries.len());
        self.data = CacheEntries::new(entries);
        Ok(())
    }

    fn save(&self) -> Result<()> {
        util::write_json(&self.path, &self.data.entries)?;
        debug!("Saved {} recent cache entries to {}", self.data.entries.len(), self.path.display());
        Ok(())
    }

    fn lookup(&self, ticker: &str) -> Option<&TickerRecord> {
        self.data.lookup(ticker)
    }

    fn upsert(&mut self, record: TickerRecord) {
        self.data.upsert(record);
    }

    fn entries(&self) -> &[TickerRecord] {
        &self.data.entries
    }

    fn replace_all(&mut self, entries: Vec<TickerRecord>) {
        self.data = CacheEntries::new(entries);
    }
}

/// 内存中的近期缓存，save 只计数
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    data: CacheEntries,
    saves: Cell<usize>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<TickerRecord>) -> Self {
        Self {
            data: CacheEntries::new(entries),
            saves: Cell::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.get()
    }
}

impl RecentCacheRepository for InMemoryCache {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }

    fn lookup(&self, ticker: &str) -> Option<&TickerRecord> {
        self.data.lookup(ticker)
    }

    fn upsert(&mut self, record: TickerRecord) {
        self.data.upsert(record);
    }

    fn entries(&self) -> &[TickerRecord] {
        &self.data.entries
    }

    fn replace_all(&mut self, entries: Vec<TickerRecord>) {
        self.data = CacheEntries::new(entries);
    }
}

/// 用快照的 1 个月新高、新低记录填充缓存，返回写入条数
pub fn seed_from_snapshot<C: RecentCacheRepository + ?Sized>(cache: &mut C, snapshot: &Snapshot) -> usize {
    let mut seeded = 0;
    for kind in ListKind::ALL {
        for record in snapshot.list(Frame::OneMonth, kind).records() {
            cache.upsert(record.clone());
            seeded += 1;
        }
    }
    seeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TickerList, NA};

    fn record(ticker: &str, sector: &str, industry: &str) -> TickerRecord {
        TickerRecord::dummy(ticker).with_classification(sector, industry)
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let cache = InMemoryCache::with_entries(vec![record("NEM", "Basic Materials", "Gold")]);
        assert_eq!(cache.lookup("nem").unwrap().industry, "Gold");
        assert!(cache.lookup("AAPL").is_none());
    }

    #[test]
    fn test_upsert_never_downgrades_resolved_entry() {
        let mut cache = InMemoryCache::new();
        cache.upsert(record("AAPL", "Technology", "Consumer Electronics"));
        cache.upsert(record("AAPL", NA, NA));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("AAPL").unwrap().sector, "Technology");

        cache.upsert(record("XYZ", NA, NA));
        cache.upsert(record("XYZ", "Energy", "Oil & Gas"));
        assert_eq!(cache.lookup("XYZ").unwrap().sector, "Energy");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_upsert_keeps_known_sector() {
        let mut cache = InMemoryCache::new();
        cache.upsert(record("NEM", "Basic Materials", NA));
        cache.upsert(record("NEM", NA, NA));
        assert_eq!(cache.lookup("NEM").unwrap().sector, "Basic Materials");

        cache.upsert(record("NEM", "Basic Materials", "Gold"));
        assert_eq!(cache.lookup("NEM").unwrap().industry, "Gold");
    }

    #[test]
    fn test_index_prefers_resolved_duplicate() {
        let cache = InMemoryCache::with_entries(vec![
            record("AAPL", NA, NA),
            record("AAPL", "Technology", "Consumer Electronics"),
        ]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("AAPL").unwrap().sector, "Technology");
    }

    #[test]
    fn test_json_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = util::recent_cache_path(dir.path());

        let mut cache = JsonFileCache::open(&path).unwrap();
        assert!(cache.is_empty());
        assert!(!cache.exists());

        cache.upsert(record("MSFT", "Technology", "Software-Infrastructure"));
        cache.save().unwrap();
        assert!(path.exists());

        let reopened = JsonFileCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.lookup("msft").unwrap().sector, "Technology");
    }

    #[test]
    fn test_seed_from_snapshot_uses_one_month_lists() {
        let mut snapshot = Snapshot::default();
        snapshot.one_month.highs = TickerList::from_records(vec![record("AAPL", "Technology", "Hardware")]);
        snapshot.one_month.lows = TickerList::from_records(vec![record("XOM", "Energy", "Oil & Gas")]);
        snapshot.three_month.highs = TickerList::from_records(vec![record("KO", "Consumer Defensive", "Beverages")]);

        let mut cache = InMemoryCache::new();
        assert_eq!(seed_from_snapshot(&mut cache, &snapshot), 2);
        assert!(cache.lookup("KO").is_none());
    }
}
