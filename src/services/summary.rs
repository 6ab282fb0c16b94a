use std::collections::BTreeSet;

use crate::models::{ArchiveRecord, Frame, Summary, TickerList};

/// 全部归档中出现过的板块、行业
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vocabularies {
    pub all_sectors: BTreeSet<String>,
    pub all_industries: BTreeSet<String>,
}

/// 计算每天每个窗口新高、新低列表的板块/行业分布
pub struct SummaryBuilder;

impl SummaryBuilder {
    /// 写入 sectorSummary / industrySummary，并返回全局板块、行业集合
    pub fn build(records: &mut [ArchiveRecord]) -> Vocabularies {
        let mut vocabularies = Vocabularies::default();
        for record in records.iter_mut() {
            for frame in Frame::ALL {
                let lists = record.snapshot.frame_mut(frame);
                for list in [&mut lists.highs, &mut lists.lows] {
                    summarize_list(list, &mut vocabularies);
                }
            }
        }
        vocabularies
    }
}

fn summarize_list(list: &mut TickerList, vocabularies: &mut Vocabularies) {
    let mut sectors = Summary::new();
    let mut industries = Summary::new();
    for record in list.records() {
        *sectors.entry(record.sector.clone()).or_insert(0) += 1;
        *industries.entry(record.industry.clone()).or_insert(0) += 1;
    }
    vocabularies.all_sectors.extend(sectors.keys().cloned());
    vocabularies.all_industries.extend(industries.keys().cloned());
    list.sector_summary = Some(sectors);
    list.industry_summary = Some(industries);
}
