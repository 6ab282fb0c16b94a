use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{ArchiveLocation, Config, ValidationPolicy};
use crate::errors::{ArchiveError, Result};
use crate::models::{ArchiveRecord, Frame, ListKind, Snapshot};
use crate::util::{self, SnapshotFileName};

/// 加载过程中的数据质量统计
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadReport {
    pub files_loaded: usize,
    pub duplicate_dates: Vec<String>,
    /// (文件, 列表) 标记了抓取错误的列表
    pub frame_errors: Vec<(String, String)>,
    pub repaired_entries: usize,
    pub excluded_removed: usize,
}

/// 读取归档目录或单个文件
pub struct ArchiveLoader<'a> {
    config: &'a Config,
}

impl<'a> ArchiveLoader<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn load(&self) -> Result<(Vec<ArchiveRecord>, LoadReport)> {
        let location = self
            .config
            .location
            .as_ref()
            .ok_or_else(|| ArchiveError::DataError("No archive directory or file configured".to_string()))?;

        let mut records = match location {
            ArchiveLocation::Directory(dir) => self.load_directory(dir)?,
            ArchiveLocation::File(file) => vec![load_file(file)?],
        };

        let mut report = LoadReport {
            files_loaded: records.len(),
            ..Default::default()
        };
        info!("Loaded {} snapshot files", records.len());

        // 重复日期
        report.duplicate_dates = find_duplicate_dates(&records);
        if !report.duplicate_dates.is_empty() {
            match self.config.duplicate_dates {
                ValidationPolicy::Abort => return Err(ArchiveError::DuplicateDates(report.duplicate_dates)),
                ValidationPolicy::Warn => warn!("Duplicate dates in archive: {:?}", report.duplicate_dates),
            }
        }

        // 抓取错误标记
        report.frame_errors = flag_frame_errors(&mut records);
        if let Some((file, list)) = report.frame_errors.first() {
            if self.config.frame_errors == ValidationPolicy::Abort {
                return Err(ArchiveError::FrameDataError {
                    file: file.clone(),
                    list: list.clone(),
                });
            }
            for (file, list) in &report.frame_errors {
                warn!("Frame data error reported in {} ({})", file, list);
            }
        }

        if self.config.remove_shell {
            report.excluded_removed = remove_industry(&mut records, &self.config.excluded_industry);
            info!(
                "Removed {} entries with industry '{}'",
                report.excluded_removed, self.config.excluded_industry
            );
        }

        // 只读原始数据或只做补全时不清洗
        if !self.config.raw_only && !self.config.parse_only {
            report.repaired_entries = clean_records(&mut records);
            if report.repaired_entries > 0 {
                info!("Cleaned {} ticker entries", report.repaired_entries);
            }
        }

        Ok((records, report))
    }

    fn load_directory(&self, dir: &Path) -> Result<Vec<ArchiveRecord>> {
        let start = self.config.start_date.as_deref();
        let end = self.config.end_date.as_deref();

        let mut records = Vec::new();
        for (path, name) in util::list_snapshot_files(dir, &self.config.file_prefix)? {
            // 只读取原始文件或只读取已解析文件
            if name.parsed == self.config.raw_only {
                continue;
            }
            if !util::date_in_range(name.date(), start, end) {
                debug!("Skipping {} outside date range", path.display());
                continue;
            }
            let snapshot: Snapshot = util::read_json(&path)?;
            records.push(ArchiveRecord::new(name.date(), snapshot, &util::file_name_of(&path)));
        }
        Ok(records)
    }
}

/// 读取单个快照文件，日期取自文件名
pub fn load_file(path: &Path) -> Result<ArchiveRecord> {
    let file_name = util::file_name_of(path);
    let name = SnapshotFileName::parse(&file_name)
        .ok_or_else(|| ArchiveError::DataError(format!("Not a snapshot file name: {}", file_name)))?;
    util::parse_archive_date(name.date())?;
    let snapshot: Snapshot = util::read_json(path)?;
    Ok(ArchiveRecord::new(name.date(), snapshot, &file_name))
}

/// 返回出现多次的日期（按日期排序）
pub fn find_duplicate_dates(records: &[ArchiveRecord]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.date.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(date, _)| date.to_string())
        .collect()
}

/// 设置每条记录的 fileErrors 标记，返回出错的 (文件, 列表)
pub fn flag_frame_errors(records: &mut [ArchiveRecord]) -> Vec<(String, String)> {
    let mut errors = Vec::new();
    for record in records.iter_mut() {
        for (frame, kind, list) in record.snapshot.lists() {
            if list.error {
                errors.push((record.file.clone(), format!("{} {}", frame, kind)));
            }
        }
        record.file_errors = record.snapshot.has_errors();
    }
    errors
}

/// 非记录项替换为占位记录，空白板块/行业改为 n/a；返回改动的条目数
pub fn clean_records(records: &mut [ArchiveRecord]) -> usize {
    let mut repaired = 0;
    for record in records.iter_mut() {
        for frame in Frame::ALL {
            for kind in ListKind::ALL {
                let list = record.snapshot.list_mut(frame, kind);
                for entry in list.tickers.iter_mut() {
                    let mut changed = entry.repair();
                    if let Some(ticker) = entry.as_record_mut() {
                        changed |= ticker.normalize_classification();
                    }
                    if changed {
                        repaired += 1;
                    }
                }
            }
        }
    }
    repaired
}

/// 删除指定行业的条目并相应减少列表总数；磁盘文件不变
pub fn remove_industry(records: &mut [ArchiveRecord], industry: &str) -> usize {
    let mut removed = 0;
    for record in records.iter_mut() {
        for frame in Frame::ALL {
            for kind in ListKind::ALL {
                let list = record.snapshot.list_mut(frame, kind);
                let before = list.tickers.len();
                list.tickers
                    .retain(|entry| entry.as_record().map_or(true, |r| r.industry != industry));
                let n = before - list.tickers.len();
                list.total -= n as i64;
                removed += n;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TickerEntry, TickerList, TickerRecord, NA};
    use serde_json::json;
    use std::fs;

    fn write_raw(dir: &Path, name: &str, value: serde_json::Value) {
        fs::write(dir.join(name), value.to_string()).unwrap();
    }

    fn parsed_day(tickers: serde_json::Value, error: bool) -> serde_json::Value {
        json!({
            "1month": {"highs": {"error": error, "total": 2, "tickers": tickers},
                       "lows": {"error": false, "total": 0, "tickers": []}}
        })
    }

    #[test]
    fn test_load_filters_by_kind_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let day = parsed_day(json!([{"ticker": "AAPL", "sector": "Technology", "industry": "Hardware"}]), false);
        write_raw(dir.path(), "bc-high-lows_20220103100000.json", json!({}));
        write_raw(dir.path(), "bc-high-lows_20220103100000_parsed.json", day.clone());
        write_raw(dir.path(), "bc-high-lows_20220104100000_parsed.json", day.clone());
        write_raw(dir.path(), "bc-high-lows_20220110100000_parsed.json", day);

        let config = Config::new()
            .with_archive_dir(dir.path())
            .with_date_range(Some("20220103"), Some("20220104"));
        let (records, report) = ArchiveLoader::new(&config).load().unwrap();

        assert_eq!(report.files_loaded, 2);
        let dates: Vec<&str> = records.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(dates, vec!["20220103", "20220104"]);
        assert_eq!(records[0].file, "bc-high-lows_20220103100000_parsed.json");
    }

    #[test]
    fn test_duplicate_dates_policy() {
        let dir = tempfile::tempdir().unwrap();
        let day = parsed_day(json!([]), false);
        write_raw(dir.path(), "bc-high-lows_20220104100000_parsed.json", day.clone());
        write_raw(dir.path(), "bc-high-lows_20220104170000_parsed.json", day);

        let warn_config = Config::new().with_archive_dir(dir.path());
        let (_, report) = ArchiveLoader::new(&warn_config).load().unwrap();
        assert_eq!(report.duplicate_dates, vec!["20220104".to_string()]);

        let abort_config = Config::new()
            .with_archive_dir(dir.path())
            .with_duplicate_dates(ValidationPolicy::Abort);
        let err = ArchiveLoader::new(&abort_config).load().unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateDates(_)));
    }

    #[test]
    fn test_frame_errors_flag_file() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "bc-high-lows_20220104100000_parsed.json", parsed_day(json!([]), true));

        let config = Config::new().with_archive_dir(dir.path());
        let (records, report) = ArchiveLoader::new(&config).load().unwrap();
        assert!(records[0].file_errors);
        assert_eq!(report.frame_errors[0].1, "1month highs");

        let abort = Config::new()
            .with_archive_dir(dir.path())
            .with_frame_errors(ValidationPolicy::Abort);
        assert!(matches!(
            ArchiveLoader::new(&abort).load().unwrap_err(),
            ArchiveError::FrameDataError { .. }
        ));
    }

    #[test]
    fn test_clean_repairs_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bc-high-lows_20220104100000_parsed.json");
        write_raw(
            dir.path(),
            "bc-high-lows_20220104100000_parsed.json",
            parsed_day(json!([{"ticker": "AAPL", "sector": "Technology", "industry": ""}, {"sector": "Energy"}]), false),
        );

        let config = Config::new().with_archive_file(&file);
        let (records, report) = ArchiveLoader::new(&config).load().unwrap();
        assert_eq!(report.repaired_entries, 2);

        let highs: Vec<&TickerRecord> = records[0].snapshot.list(Frame::OneMonth, ListKind::Highs).records().collect();
        assert_eq!(highs[0].industry, NA);
        assert_eq!(highs[1].ticker, NA);
        assert_eq!(highs[1].sector, NA);
    }

    #[test]
    fn test_nested_field_values_do_not_wipe_record() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(
            dir.path(),
            "bc-high-lows_20220104100000_parsed.json",
            parsed_day(
                json!([{"ticker": "AAPL", "sector": "Technology", "industry": "Consumer Electronics",
                        "marketCap": {"raw": 1, "fmt": "1"}}]),
                false,
            ),
        );

        let config = Config::new().with_archive_dir(dir.path());
        let (records, report) = ArchiveLoader::new(&config).load().unwrap();
        assert_eq!(report.repaired_entries, 0);

        let highs = records[0].snapshot.list(Frame::OneMonth, ListKind::Highs);
        let aapl = highs.records().next().unwrap();
        assert_eq!(aapl.sector, "Technology");
        assert_eq!(aapl.industry, "Consumer Electronics");
    }

    #[test]
    fn test_raw_only_keeps_symbols() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), "bc-high-lows_20220104100000.json", parsed_day(json!(["AAPL", "MSFT"]), false));

        let config = Config::new().with_archive_dir(dir.path()).with_raw_only(true);
        let (records, report) = ArchiveLoader::new(&config).load().unwrap();
        assert_eq!(report.repaired_entries, 0);
        assert_eq!(
            records[0].snapshot.list(Frame::OneMonth, ListKind::Highs).tickers[0],
            TickerEntry::Symbol("AAPL".to_string())
        );
    }

    #[test]
    fn test_remove_industry_decrements_total() {
        let mut snapshot = Snapshot::default();
        snapshot.one_month.lows = TickerList::from_records(vec![
            TickerRecord::dummy("SPAC").with_classification("Financial Services", "Shell Companies"),
            TickerRecord::dummy("KO").with_classification("Consumer Defensive", "Beverages"),
        ]);
        let mut records = vec![ArchiveRecord::new("20220104", snapshot, "f.json")];

        assert_eq!(remove_industry(&mut records, "Shell Companies"), 1);
        let lows = records[0].snapshot.list(Frame::OneMonth, ListKind::Lows);
        assert_eq!(lows.total, 1);
        assert_eq!(lows.symbols(), vec!["KO"]);
    }
}
