use std::path::PathBuf;
use std::time::Duration;

/// 校验失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    Warn,
    Abort,
}

/// 归档位置：目录（多个快照文件）或单个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    Directory(PathBuf),
    File(PathBuf),
}

impl ArchiveLocation {
    /// 近期缓存所在的目录（归档目录的上级目录）
    pub fn parent_dir(&self) -> Option<PathBuf> {
        let base = match self {
            ArchiveLocation::Directory(dir) => dir.as_path(),
            ArchiveLocation::File(file) => file.parent()?,
        };
        base.parent().map(|p| p.to_path_buf())
    }
}

pub struct Config {
    pub location: Option<ArchiveLocation>,
    pub file_prefix: String,
    pub raw_only: bool,
    pub parse_only: bool,
    pub use_recent_cache: bool,
    pub clean_recent_cache: bool,
    pub duplicate_dates: ValidationPolicy,
    pub frame_errors: ValidationPolicy,
    pub remove_shell: bool,
    pub excluded_industry: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub retry_attempts: usize,
    pub retry_backoff: Duration,
    pub api_delay: Option<Duration>,
    pub error_log_path: PathBuf,
    pub progress_every: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            location: None,
            file_prefix: "bc-high-lows".to_string(),
            raw_only: false,
            parse_only: false,
            use_recent_cache: false,
            clean_recent_cache: false,
            duplicate_dates: ValidationPolicy::Warn,
            frame_errors: ValidationPolicy::Warn,
            remove_shell: false,
            excluded_industry: "Shell Companies".to_string(),
            start_date: None,
            end_date: None,
            retry_attempts: 10,
            retry_backoff: Duration::from_secs(30),
            api_delay: None,
            error_log_path: PathBuf::from("errorLog.json"),
            progress_every: 25,
        }
    }

    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.location = Some(ArchiveLocation::Directory(dir.into()));
        self
    }

    pub fn with_archive_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.location = Some(ArchiveLocation::File(file.into()));
        self
    }

    pub fn with_file_prefix(mut self, prefix: &str) -> Self {
        self.file_prefix = prefix.to_string();
        self
    }

    pub fn with_raw_only(mut self, raw_only: bool) -> Self {
        self.raw_only = raw_only;
        self
    }

    // 只补全数据，不做清洗和汇总
    pub fn with_parse_only(mut self, parse_only: bool) -> Self {
        self.parse_only = parse_only;
        self
    }

    pub fn with_recent_cache(mut self, use_recent_cache: bool) -> Self {
        self.use_recent_cache = use_recent_cache;
        self
    }

    pub fn with_clean_recent_cache(mut self, clean: bool) -> Self {
        self.clean_recent_cache = clean;
        self
    }

    pub fn with_duplicate_dates(mut self, policy: ValidationPolicy) -> Self {
        self.duplicate_dates = policy;
        self
    }

    pub fn with_frame_errors(mut self, policy: ValidationPolicy) -> Self {
        self.frame_errors = policy;
        self
    }

    pub fn with_remove_shell(mut self, remove_shell: bool) -> Self {
        self.remove_shell = remove_shell;
        self
    }

    pub fn with_excluded_industry(mut self, industry: &str) -> Self {
        self.excluded_industry = industry.to_string();
        self
    }

    /// 日期格式为 YYYYMMDD，闭区间
    pub fn with_date_range(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start_date = start.map(|s| s.to_string());
        self.end_date = end.map(|s| s.to_string());
        self
    }

    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_api_delay(mut self, delay: Option<Duration>) -> Self {
        self.api_delay = delay;
        self
    }

    pub fn with_error_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log_path = path.into();
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
