use thiserror::Error;

use crate::providers::ProviderError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Duplicate dates in archive: {0:?}")]
    DuplicateDates(Vec<String>),

    #[error("Frame data error reported in file {file} ({list})")]
    FrameDataError { file: String, list: String },

    #[error("Enrichment aborted in {file}: {list} #{position} ({ticker}) could not be resolved")]
    EnrichmentAborted {
        file: String,
        list: String,
        position: usize,
        ticker: String,
    },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

// 用于从字符串创建错误
impl From<String> for ArchiveError {
    fn from(s: String) -> Self {
        ArchiveError::Unknown(s)
    }
}

// 用于从&str创建错误
impl From<&str> for ArchiveError {
    fn from(s: &str) -> Self {
        ArchiveError::Unknown(s.to_string())
    }
}
