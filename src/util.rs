use chrono::NaiveDate;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{ArchiveError, Result};

pub const RECENT_CACHE_DIR: &str = "highlow_recent_cache";
pub const RECENT_CACHE_FILE: &str = "recent_cache.json";
const PARSED_SUFFIX: &str = "_parsed";

/// 解析 YYYYMMDD 格式的交易日期
pub fn parse_archive_date(date_str: &str) -> Result<NaiveDate> {
    if date_str.len() != 8 || !date_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(ArchiveError::DataError(format!("Invalid date format: {}", date_str)));
    }
    Ok(NaiveDate::parse_from_str(date_str, "%Y%m%d")?)
}

/// 任意格式的日期字符串转换为 YYYYMMDD
pub fn normalize_date(date_str: &str, format: &str) -> Result<String> {
    let date = NaiveDate::parse_from_str(date_str, format)?;
    Ok(date.format("%Y%m%d").to_string())
}

/// 闭区间判断，边界为 None 表示不限
pub fn date_in_range(date: &str, start: Option<&str>, end: Option<&str>) -> bool {
    start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
}

/// 保留指定位数的小数
pub fn pretty_round(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// 快照文件名：`<prefix>_<14位时间戳>.json` 或 `<prefix>_<14位时间戳>_parsed.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFileName {
    pub prefix: String,
    pub timestamp: String,
    pub parsed: bool,
}

impl SnapshotFileName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;
        let (stem, parsed) = match stem.strip_suffix(PARSED_SUFFIX) {
            Some(s) => (s, true),
            None => (stem, false),
        };
        let (prefix, timestamp) = stem.rsplit_once('_')?;
        if prefix.is_empty() || timestamp.len() != 14 || !timestamp.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            prefix: prefix.to_string(),
            timestamp: timestamp.to_string(),
            parsed,
        })
    }

    /// 交易日期：时间戳的前 8 位
    pub fn date(&self) -> &str {
        &self.timestamp[..8]
    }

    pub fn raw_name(&self) -> String {
        format!("{}_{}.json", self.prefix, self.timestamp)
    }

    pub fn parsed_name(&self) -> String {
        format!("{}_{}{}.json", self.prefix, self.timestamp, PARSED_SUFFIX)
    }
}

/// 列出目录中匹配前缀的快照文件，按文件名排序
pub fn list_snapshot_files(dir: &Path, prefix: &str) -> Result<Vec<(PathBuf, SnapshotFileName)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match SnapshotFileName::parse(name) {
            Some(parsed) if parsed.prefix == prefix => files.push((path.clone(), parsed)),
            _ => debug!("Skipping non-snapshot file {}", path.display()),
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// 近期缓存文件路径：<归档上级目录>/highlow_recent_cache/recent_cache.json
pub fn recent_cache_path(parent_dir: &Path) -> PathBuf {
    parent_dir.join(RECENT_CACHE_DIR).join(RECENT_CACHE_FILE)
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// 写入 JSON 文件，目录不存在时自动创建
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}
