//! 查询：按日期、窗口、新高/新低、板块、行业过滤归档，并生成时间序列
//!
//! 所有查询都在归档的深拷贝上进行，不修改已加载的数据。

use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::models::{summary_count, ArchiveRecord, Frame, ListKind, Summary, TickerEntry, TickerList, TickerRecord};
use crate::providers::SectorVocabulary;
use crate::services::summary::Vocabularies;
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DateSelection {
    #[default]
    All,
    Dates(BTreeSet<String>),
    /// YYYYMMDD，闭区间
    Range { start: String, end: String },
}

impl DateSelection {
    fn matches(&self, date: &str) -> bool {
        match self {
            DateSelection::All => true,
            DateSelection::Dates(dates) => dates.contains(date),
            DateSelection::Range { start, end } => util::date_in_range(date, Some(start), Some(end)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FrameSelection {
    #[default]
    All,
    One(Frame),
    Set(Vec<Frame>),
}

impl FrameSelection {
    pub fn frames(&self) -> Vec<Frame> {
        match self {
            FrameSelection::All => Frame::ALL.to_vec(),
            FrameSelection::One(frame) => vec![*frame],
            FrameSelection::Set(frames) => Frame::ALL.into_iter().filter(|f| frames.contains(f)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSelection {
    High,
    Low,
    #[default]
    Both,
}

impl ListSelection {
    pub fn kinds(&self) -> Vec<ListKind> {
        match self {
            ListSelection::High => vec![ListKind::Highs],
            ListSelection::Low => vec![ListKind::Lows],
            ListSelection::Both => ListKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NameFilter {
    #[default]
    All,
    Names(Vec<String>),
}

impl NameFilter {
    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        NameFilter::Names(names.iter().map(|n| n.as_ref().to_string()).collect())
    }
}

/// 查询条件
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    pub dates: DateSelection,
    pub frames: FrameSelection,
    pub lists: ListSelection,
    pub sectors: NameFilter,
    pub industries: NameFilter,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dates(mut self, dates: DateSelection) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_frames(mut self, frames: FrameSelection) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_lists(mut self, lists: ListSelection) -> Self {
        self.lists = lists;
        self
    }

    pub fn with_sectors(mut self, sectors: NameFilter) -> Self {
        self.sectors = sectors;
        self
    }

    pub fn with_industries(mut self, industries: NameFilter) -> Self {
        self.industries = industries;
        self
    }
}

/// 单个窗口过滤后的列表；被排除的类型为 None
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkingFrame {
    pub highs: Option<TickerList>,
    pub lows: Option<TickerList>,
}

impl WorkingFrame {
    pub fn list(&self, kind: ListKind) -> Option<&TickerList> {
        match kind {
            ListKind::Highs => self.highs.as_ref(),
            ListKind::Lows => self.lows.as_ref(),
        }
    }

    pub fn lists(&self) -> impl Iterator<Item = (ListKind, &TickerList)> {
        ListKind::ALL
            .into_iter()
            .filter_map(move |kind| self.list(kind).map(|list| (kind, list)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkingDay {
    pub date: String,
    pub file: String,
    pub frames: BTreeMap<Frame, WorkingFrame>,
}

/// 查询结果：归档子集的独立拷贝
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkingArchive {
    pub days: Vec<WorkingDay>,
}

impl WorkingArchive {
    pub fn dates(&self) -> Vec<&str> {
        self.days.iter().map(|d| d.date.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// 去重后的股票
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UniqueTickers {
    #[serde(rename = "tickersOnly")]
    pub symbols: Vec<String>,
    #[serde(rename = "tickerData")]
    pub records: Vec<TickerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Sector,
    Industry,
}

impl SummaryKind {
    fn summary(self, list: &TickerList) -> Option<&Summary> {
        match self {
            SummaryKind::Sector => list.sector_summary.as_ref(),
            SummaryKind::Industry => list.industry_summary.as_ref(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            SummaryKind::Sector => "sector",
            SummaryKind::Industry => "industry",
        }
    }
}

/// 某个名称在某个窗口下的时间序列，各数组一一对应
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SeriesPoints {
    pub dates: Vec<String>,
    pub highs: Vec<u32>,
    pub lows: Vec<u32>,
    #[serde(rename = "hlRatios")]
    pub hl_ratios: Vec<f64>,
    #[serde(rename = "hlPlusMinus")]
    pub hl_plus_minus: Vec<i64>,
}

impl SeriesPoints {
    fn push(&mut self, date: &str, high: u32, low: u32) {
        self.dates.push(date.to_string());
        self.highs.push(high);
        self.lows.push(low);
        self.hl_ratios.push(hl_ratio(high, low));
        self.hl_plus_minus.push(high as i64 - low as i64);
    }
}

/// 名称 -> 窗口 -> 序列
pub type SummarySeries = BTreeMap<String, BTreeMap<Frame, SeriesPoints>>;

/// 新高/新低比：都为 0 时为 0，只有新低为 0 时为正无穷，否则保留两位小数
pub fn hl_ratio(high: u32, low: u32) -> f64 {
    match (high, low) {
        (0, 0) => 0.0,
        (_, 0) => f64::INFINITY,
        _ => util::pretty_round(high as f64 / low as f64, 2),
    }
}

/// 查询引擎，可选的词表用于纠正板块/行业名称的大小写
#[derive(Clone, Default)]
pub struct QueryEngine {
    vocabulary: Option<Arc<dyn SectorVocabulary + Send + Sync>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vocabulary(mut self, vocabulary: Arc<dyn SectorVocabulary + Send + Sync>) -> Self {
        self.vocabulary = Some(vocabulary);
        self
    }

    /// 规范名称；没有匹配时原样使用并警告
    fn proper_name(&self, name: &str, label: &str) -> String {
        match self.vocabulary.as_ref().and_then(|v| v.canonicalize(name)) {
            Some(proper) => proper,
            None => {
                match self.vocabulary {
                    Some(_) => warn!("{} '{}' is not in the sector/industry vocabulary, using it as provided", label, name),
                    None => warn!("No sector/industry vocabulary loaded, using {} '{}' as provided", label, name),
                }
                name.to_string()
            }
        }
    }

    fn filter_set(&self, filter: &NameFilter, label: &str) -> Option<HashSet<String>> {
        match filter {
            NameFilter::All => None,
            NameFilter::Names(names) => Some(
                names
                    .iter()
                    .map(|n| self.proper_name(n, label).to_lowercase())
                    .collect(),
            ),
        }
    }

    /// 生成过滤后的深拷贝
    pub fn select(&self, archive: &[ArchiveRecord], query: &Query) -> WorkingArchive {
        let frames = query.frames.frames();
        let kinds = query.lists.kinds();
        let sectors = self.filter_set(&query.sectors, "sector");
        let industries = self.filter_set(&query.industries, "industry");

        let keep = |entry: &TickerEntry| -> bool {
            if sectors.is_none() && industries.is_none() {
                return true;
            }
            let Some(record) = entry.as_record() else {
                return false;
            };
            sectors.as_ref().map_or(true, |s| s.contains(&record.sector.to_lowercase()))
                && industries
                    .as_ref()
                    .map_or(true, |i| i.contains(&record.industry.to_lowercase()))
        };

        let days = archive
            .iter()
            .filter(|record| query.dates.matches(&record.date))
            .map(|record| {
                let mut working_frames = BTreeMap::new();
                for &frame in &frames {
                    let mut working = WorkingFrame::default();
                    for &kind in &kinds {
                        let source = record.snapshot.list(frame, kind);
                        let mut list = source.clone();
                        list.tickers.retain(|entry| keep(entry));
                        match kind {
                            ListKind::Highs => working.highs = Some(list),
                            ListKind::Lows => working.lows = Some(list),
                        }
                    }
                    working_frames.insert(frame, working);
                }
                WorkingDay {
                    date: record.date.clone(),
                    file: record.file.clone(),
                    frames: working_frames,
                }
            })
            .collect();

        WorkingArchive { days }
    }

    /// select 后取去重的股票
    pub fn stock_list(&self, archive: &[ArchiveRecord], query: &Query) -> UniqueTickers {
        unique_tickers(&self.select(archive, query))
    }

    /// 逐日读取汇总中的计数，生成每个名称、每个窗口的序列
    pub fn summary_series(
        &self,
        working: &WorkingArchive,
        kind: SummaryKind,
        names: &NameFilter,
        vocabularies: &Vocabularies,
    ) -> SummarySeries {
        let report_names: Vec<String> = match names {
            NameFilter::All => match kind {
                SummaryKind::Sector => vocabularies.all_sectors.iter().cloned().collect(),
                SummaryKind::Industry => vocabularies.all_industries.iter().cloned().collect(),
            },
            NameFilter::Names(names) => {
                // 规范化后可能重名，按首次出现去重
                let mut seen = HashSet::new();
                names
                    .iter()
                    .map(|n| self.proper_name(n, kind.label()))
                    .filter(|n| seen.insert(n.clone()))
                    .collect()
            }
        };

        let mut series: SummarySeries = report_names
            .iter()
            .map(|name| {
                let frames = Frame::ALL.into_iter().map(|f| (f, SeriesPoints::default())).collect();
                (name.clone(), frames)
            })
            .collect();

        for day in &working.days {
            for (frame, lists) in &day.frames {
                let high_summary = lists.highs.as_ref().and_then(|l| kind.summary(l));
                let low_summary = lists.lows.as_ref().and_then(|l| kind.summary(l));
                for name in &report_names {
                    let high = summary_count(high_summary, name);
                    let low = summary_count(low_summary, name);
                    if let Some(points) = series.get_mut(name).and_then(|frames| frames.get_mut(frame)) {
                        points.push(&day.date, high, low);
                    }
                }
            }
        }

        series
    }
}

/// 按出现顺序去重（代码忽略大小写）
pub fn unique_tickers(working: &WorkingArchive) -> UniqueTickers {
    let mut seen = HashSet::new();
    let mut result = UniqueTickers::default();
    for day in &working.days {
        for lists in day.frames.values() {
            for (_, list) in lists.lists() {
                for entry in &list.tickers {
                    let Some(symbol) = entry.symbol() else {
                        continue;
                    };
                    if !seen.insert(symbol.to_uppercase()) {
                        continue;
                    }
                    result.symbols.push(symbol.to_string());
                    if let Some(record) = entry.as_record() {
                        result.records.push(record.clone());
                    }
                }
            }
        }
    }
    result
}
