// 公开导出的模块，供外部使用
pub mod models;
pub mod data_provider;
pub mod errors;
pub mod cache;
pub mod providers;
pub mod services;
pub mod config;

#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use models::{ArchiveRecord, Frame, ListKind, Snapshot, TickerEntry, TickerList, TickerRecord};
pub use data_provider::HighLowDataProvider;
pub use errors::{ArchiveError, Result};
pub use config::{ArchiveLocation, Config, ValidationPolicy};
pub use cache::{InMemoryCache, JsonFileCache, RecentCacheRepository};
pub use providers::{ProviderError, QuoteProvider, RetryPolicy, SecondaryProvider, SectorVocabulary};
pub use services::{DateSelection, FrameSelection, ListSelection, NameFilter, Query, SummaryKind};
