use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::ArchiveError;
use crate::models::ticker::{TickerEntry, TickerRecord};

/// 板块/行业名称 -> 数量
pub type Summary = BTreeMap<String, u32>;

/// 回看窗口：1/3/6/12 个月
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Frame {
    #[serde(rename = "1month")]
    OneMonth,
    #[serde(rename = "3month")]
    ThreeMonth,
    #[serde(rename = "6month")]
    SixMonth,
    #[serde(rename = "12month")]
    TwelveMonth,
}

impl Frame {
    pub const ALL: [Frame; 4] = [Frame::OneMonth, Frame::ThreeMonth, Frame::SixMonth, Frame::TwelveMonth];

    pub fn key(&self) -> &'static str {
        match self {
            Frame::OneMonth => "1month",
            Frame::ThreeMonth => "3month",
            Frame::SixMonth => "6month",
            Frame::TwelveMonth => "12month",
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            Frame::OneMonth => 1,
            Frame::ThreeMonth => 3,
            Frame::SixMonth => 6,
            Frame::TwelveMonth => 12,
        }
    }

    pub fn from_months(months: u32) -> Option<Self> {
        match months {
            1 => Some(Frame::OneMonth),
            3 => Some(Frame::ThreeMonth),
            6 => Some(Frame::SixMonth),
            12 => Some(Frame::TwelveMonth),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Frame {
    type Err = ArchiveError;

    /// 接受 "1"、"1m"、"1month" 等写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let digits = lowered
            .strip_suffix("month")
            .or_else(|| lowered.strip_suffix('m'))
            .unwrap_or(&lowered);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Frame::from_months)
            .ok_or_else(|| ArchiveError::DataError(format!("Invalid stock frame: {}", s)))
    }
}

/// 新高 / 新低
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ListKind {
    #[serde(rename = "highs")]
    Highs,
    #[serde(rename = "lows")]
    Lows,
}

impl ListKind {
    pub const ALL: [ListKind; 2] = [ListKind::Highs, ListKind::Lows];

    pub fn key(&self) -> &'static str {
        match self {
            ListKind::Highs => "highs",
            ListKind::Lows => "lows",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// 某个窗口下的新高或新低列表
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TickerList {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub tickers: Vec<TickerEntry>,
    #[serde(rename = "sectorSummary", default, skip_serializing_if = "Option::is_none")]
    pub sector_summary: Option<Summary>,
    #[serde(rename = "industrySummary", default, skip_serializing_if = "Option::is_none")]
    pub industry_summary: Option<Summary>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TickerList {
    pub fn from_records(records: Vec<TickerRecord>) -> Self {
        Self {
            total: records.len() as i64,
            tickers: records.into_iter().map(TickerEntry::from).collect(),
            ..Default::default()
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &TickerRecord> {
        self.tickers.iter().filter_map(|entry| entry.as_record())
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut TickerRecord> {
        self.tickers.iter_mut().filter_map(|entry| entry.as_record_mut())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.tickers
            .iter()
            .filter_map(|entry| entry.symbol().map(|s| s.to_string()))
            .collect()
    }
}

/// 单个窗口的新高、新低两个列表
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameLists {
    #[serde(default)]
    pub highs: TickerList,
    #[serde(default)]
    pub lows: TickerList,
}

impl FrameLists {
    pub fn list(&self, kind: ListKind) -> &TickerList {
        match kind {
            ListKind::Highs => &self.highs,
            ListKind::Lows => &self.lows,
        }
    }

    pub fn list_mut(&mut self, kind: ListKind) -> &mut TickerList {
        match kind {
            ListKind::Highs => &mut self.highs,
            ListKind::Lows => &mut self.lows,
        }
    }
}

/// 一天的抓取结果，四个窗口
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "1month", default)]
    pub one_month: FrameLists,
    #[serde(rename = "3month", default)]
    pub three_month: FrameLists,
    #[serde(rename = "6month", default)]
    pub six_month: FrameLists,
    #[serde(rename = "12month", default)]
    pub twelve_month: FrameLists,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn frame(&self, frame: Frame) -> &FrameLists {
        match frame {
            Frame::OneMonth => &self.one_month,
            Frame::ThreeMonth => &self.three_month,
            Frame::SixMonth => &self.six_month,
            Frame::TwelveMonth => &self.twelve_month,
        }
    }

    pub fn frame_mut(&mut self, frame: Frame) -> &mut FrameLists {
        match frame {
            Frame::OneMonth => &mut self.one_month,
            Frame::ThreeMonth => &mut self.three_month,
            Frame::SixMonth => &mut self.six_month,
            Frame::TwelveMonth => &mut self.twelve_month,
        }
    }

    pub fn list(&self, frame: Frame, kind: ListKind) -> &TickerList {
        self.frame(frame).list(kind)
    }

    pub fn list_mut(&mut self, frame: Frame, kind: ListKind) -> &mut TickerList {
        self.frame_mut(frame).list_mut(kind)
    }

    /// 按固定顺序遍历全部 (窗口, 类型) 列表
    pub fn lists(&self) -> impl Iterator<Item = (Frame, ListKind, &TickerList)> {
        Frame::ALL
            .into_iter()
            .flat_map(|frame| ListKind::ALL.into_iter().map(move |kind| (frame, kind)))
            .map(move |(frame, kind)| (frame, kind, self.list(frame, kind)))
    }

    pub fn has_errors(&self) -> bool {
        self.lists().any(|(_, _, list)| list.error)
    }
}

/// 读取汇总中的计数，先精确匹配，再忽略大小写
pub fn summary_count(summary: Option<&Summary>, name: &str) -> u32 {
    let Some(summary) = summary else {
        return 0;
    };
    if let Some(count) = summary.get(name) {
        return *count;
    }
    summary
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, count)| *count)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_parsing() {
        assert_eq!("1".parse::<Frame>().unwrap(), Frame::OneMonth);
        assert_eq!("3m".parse::<Frame>().unwrap(), Frame::ThreeMonth);
        assert_eq!("6Month".parse::<Frame>().unwrap(), Frame::SixMonth);
        assert_eq!("12month".parse::<Frame>().unwrap(), Frame::TwelveMonth);
        assert!("2m".parse::<Frame>().is_err());
    }

    #[test]
    fn test_snapshot_from_raw_json() {
        let raw = json!({
            "1month": {"highs": {"error": false, "total": 2, "tickers": ["AAPL", "MSFT"]},
                       "lows": {"error": true, "total": 0, "tickers": []}},
            "3month": {"highs": {"error": false, "total": 0, "tickers": []},
                       "lows": {"error": false, "total": 0, "tickers": []}}
        });
        let snapshot: Snapshot = serde_json::from_value(raw).unwrap();

        assert_eq!(snapshot.list(Frame::OneMonth, ListKind::Highs).symbols(), vec!["AAPL", "MSFT"]);
        assert!(snapshot.has_errors());
        assert_eq!(snapshot.list(Frame::TwelveMonth, ListKind::Lows).total, 0);
        assert_eq!(snapshot.lists().count(), 8);
    }

    #[test]
    fn test_summary_count_is_case_insensitive() {
        let mut summary = Summary::new();
        summary.insert("Technology".to_string(), 3);
        assert_eq!(summary_count(Some(&summary), "Technology"), 3);
        assert_eq!(summary_count(Some(&summary), "technology"), 3);
        assert_eq!(summary_count(Some(&summary), "Energy"), 0);
        assert_eq!(summary_count(None, "Technology"), 0);
    }
}
