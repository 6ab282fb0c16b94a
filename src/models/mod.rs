pub mod archive;
pub mod snapshot;
pub mod ticker;

pub use archive::ArchiveRecord;
pub use snapshot::{summary_count, Frame, FrameLists, ListKind, Snapshot, Summary, TickerList};
pub use ticker::{Metric, TickerEntry, TickerRecord, NA};
