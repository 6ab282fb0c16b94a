use serde::{Deserialize, Serialize};

use crate::models::snapshot::Snapshot;

/// 归档中的一天（一个快照文件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// YYYYMMDD，取自文件名中的时间戳
    pub date: String,
    pub snapshot: Snapshot,
    pub file: String,
    #[serde(rename = "fileErrors")]
    pub file_errors: bool,
}

impl ArchiveRecord {
    pub fn new(date: &str, snapshot: Snapshot, file: &str) -> Self {
        Self {
            date: date.to_string(),
            snapshot,
            file: file.to_string(),
            file_errors: false,
        }
    }
}
