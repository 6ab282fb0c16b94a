pub mod enrichment;
pub mod loader;
pub mod query;
pub mod summary;

pub use enrichment::{EnrichmentPipeline, EnrichmentReport, ErrorLog, ErrorLogEntry};
pub use loader::{ArchiveLoader, LoadReport};
pub use query::{
    hl_ratio, unique_tickers, DateSelection, FrameSelection, ListSelection, NameFilter, Query, QueryEngine,
    SeriesPoints, SummaryKind, SummarySeries, UniqueTickers, WorkingArchive,
};
pub use summary::{SummaryBuilder, Vocabularies};
