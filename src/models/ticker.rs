use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 数据不可用时的占位值
pub const NA: &str = "n/a";

/// 行情数值字段：数字，或者 "n/a" 之类的文本占位；其他形状原样保留
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metric {
    Number(f64),
    Flag(bool),
    Text(String),
    Null,
    Other(Value),
}

impl Metric {
    pub fn na() -> Self {
        Metric::Text(NA.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Metric::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Metric::na()
    }
}

impl From<f64> for Metric {
    fn from(v: f64) -> Self {
        Metric::Number(v)
    }
}

fn na_text() -> String {
    NA.to_string()
}

// 文本字段：null 视为 n/a，数字转为字符串
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => na_text(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

// 区分“字段不存在”（None）和“字段为 null”（Some(None)）
fn present<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(Some(value.and_then(|v| v.as_f64())))
}

/// 单个股票的补全数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub ticker: String,
    #[serde(default)]
    pub price: Metric,
    #[serde(default = "na_text", deserialize_with = "lenient_text")]
    pub sector: String,
    #[serde(default = "na_text", deserialize_with = "lenient_text")]
    pub industry: String,
    #[serde(default = "na_text", deserialize_with = "lenient_text")]
    pub exchange: String,
    #[serde(rename = "marketCap", default)]
    pub market_cap: Metric,
    #[serde(default)]
    pub volume: Metric,
    #[serde(rename = "volume10Day", default)]
    pub volume_10_day: Metric,
    #[serde(rename = "52WeekChange", default)]
    pub week_52_change: Metric,
    #[serde(rename = "52WeekHigh", default)]
    pub week_52_high: Metric,
    #[serde(rename = "52WeekLow", default)]
    pub week_52_low: Metric,
    #[serde(rename = "52HighLowDiff", default)]
    pub high_low_diff_52: Metric,
    #[serde(rename = "shortRatio", default)]
    pub short_ratio: Metric,
    #[serde(rename = "companyName", default = "na_text", deserialize_with = "lenient_text")]
    pub company_name: String,
    #[serde(rename = "businessSummary", default = "na_text", deserialize_with = "lenient_text")]
    pub business_summary: String,
    #[serde(rename = "previousClose", default)]
    pub previous_close: Metric,
    #[serde(rename = "marketOpen", default)]
    pub market_open: Metric,
    #[serde(rename = "200Average", default)]
    pub average_200: Metric,
    #[serde(rename = "50Average", default)]
    pub average_50: Metric,
    #[serde(rename = "dayLow", default)]
    pub day_low: Metric,
    #[serde(rename = "dayHigh", default)]
    pub day_high: Metric,

    // 第二数据源补充的字段
    #[serde(rename = "secondaryAveVolume10d", default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub secondary_ave_volume_10d: Option<Option<f64>>,
    #[serde(rename = "secondaryLastClose", default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub secondary_last_close: Option<Option<f64>>,
    #[serde(rename = "secondary52WeekHigh", default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub secondary_52_week_high: Option<Option<f64>>,
    #[serde(rename = "secondary52WeekLow", default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub secondary_52_week_low: Option<Option<f64>>,

    /// 未识别的字段原样保留
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TickerRecord {
    /// 所有字段均为 n/a 的占位记录，只保留代码
    pub fn dummy(symbol: &str) -> Self {
        Self {
            ticker: symbol.to_string(),
            price: Metric::na(),
            sector: na_text(),
            industry: na_text(),
            exchange: na_text(),
            market_cap: Metric::na(),
            volume: Metric::na(),
            volume_10_day: Metric::na(),
            week_52_change: Metric::na(),
            week_52_high: Metric::na(),
            week_52_low: Metric::na(),
            high_low_diff_52: Metric::na(),
            short_ratio: Metric::na(),
            company_name: na_text(),
            business_summary: na_text(),
            previous_close: Metric::na(),
            market_open: Metric::na(),
            average_200: Metric::na(),
            average_50: Metric::na(),
            day_low: Metric::na(),
            day_high: Metric::na(),
            secondary_ave_volume_10d: None,
            secondary_last_close: None,
            secondary_52_week_high: None,
            secondary_52_week_low: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_classification(mut self, sector: &str, industry: &str) -> Self {
        self.sector = sector.to_string();
        self.industry = industry.to_string();
        self
    }

    pub fn has_sector(&self) -> bool {
        self.sector != NA
    }

    pub fn has_industry(&self) -> bool {
        self.industry != NA
    }

    /// 行业和板块都已知
    pub fn is_resolved(&self) -> bool {
        self.has_sector() && self.has_industry()
    }

    /// 空白的 sector/industry 统一为 n/a，返回是否有改动
    pub fn normalize_classification(&mut self) -> bool {
        let mut changed = false;
        if self.sector.trim().is_empty() {
            self.sector = na_text();
            changed = true;
        }
        if self.industry.trim().is_empty() {
            self.industry = na_text();
            changed = true;
        }
        changed
    }

    pub fn same_symbol(&self, symbol: &str) -> bool {
        self.ticker.eq_ignore_ascii_case(symbol)
    }
}

/// 列表中的一项：原始文件里是股票代码，补全后是完整记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TickerEntry {
    Record(TickerRecord),
    Symbol(String),
    Malformed(Value),
}

impl TickerEntry {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            TickerEntry::Record(record) => Some(&record.ticker),
            TickerEntry::Symbol(symbol) => Some(symbol),
            TickerEntry::Malformed(value) => value
                .get("ticker")
                .or_else(|| value.get("symbol"))
                .and_then(|v| v.as_str()),
        }
    }

    pub fn as_record(&self) -> Option<&TickerRecord> {
        match self {
            TickerEntry::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut TickerRecord> {
        match self {
            TickerEntry::Record(record) => Some(record),
            _ => None,
        }
    }

    /// 非记录项替换为占位记录，返回是否发生替换
    pub fn repair(&mut self) -> bool {
        if let TickerEntry::Record(_) = self {
            return false;
        }
        let symbol = self.symbol().unwrap_or(NA).to_string();
        *self = TickerEntry::Record(TickerRecord::dummy(&symbol));
        true
    }
}

impl From<TickerRecord> for TickerEntry {
    fn from(record: TickerRecord) -> Self {
        TickerEntry::Record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_variants_from_json() {
        let entries: Vec<TickerEntry> = serde_json::from_value(json!([
            "AAPL",
            {"ticker": "MSFT", "sector": "Technology", "price": 301.5},
            {"sector": "Energy"}
        ]))
        .unwrap();

        assert_eq!(entries[0], TickerEntry::Symbol("AAPL".to_string()));
        let msft = entries[1].as_record().unwrap();
        assert_eq!(msft.sector, "Technology");
        assert_eq!(msft.industry, NA);
        assert_eq!(msft.price.as_f64(), Some(301.5));
        assert!(matches!(entries[2], TickerEntry::Malformed(_)));
    }

    #[test]
    fn test_repair_keeps_recoverable_symbol() {
        let mut entry = TickerEntry::Malformed(json!({"symbol": "XOM", "sector": "Energy"}));
        assert!(entry.repair());
        let record = entry.as_record().unwrap();
        assert_eq!(record.ticker, "XOM");
        assert_eq!(record.sector, NA);

        let mut unknown = TickerEntry::Malformed(json!(42));
        assert!(unknown.repair());
        assert_eq!(unknown.as_record().unwrap().ticker, NA);
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let value = json!({"ticker": "NEM", "sector": null, "allData": false, "averageVolume": 10});
        let record: TickerRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.sector, NA);
        assert_eq!(record.extra.get("allData"), Some(&json!(false)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["averageVolume"], json!(10));
        assert!(back.get("secondaryAveVolume10d").is_none());
    }

    #[test]
    fn test_secondary_field_absent_vs_null() {
        let absent: TickerRecord = serde_json::from_value(json!({"ticker": "A"})).unwrap();
        let null: TickerRecord =
            serde_json::from_value(json!({"ticker": "B", "secondaryAveVolume10d": null})).unwrap();
        assert_eq!(absent.secondary_ave_volume_10d, None);
        assert_eq!(null.secondary_ave_volume_10d, Some(None));
    }

    #[test]
    fn test_unexpected_field_shapes_keep_record() {
        let entry: TickerEntry = serde_json::from_value(json!({
            "ticker": "AAPL",
            "sector": "Technology",
            "industry": "Consumer Electronics",
            "marketCap": {"raw": 1, "fmt": "1"},
            "secondaryLastClose": "n/a"
        }))
        .unwrap();

        let record = entry.as_record().unwrap();
        assert_eq!(record.sector, "Technology");
        assert_eq!(record.market_cap, Metric::Other(json!({"raw": 1, "fmt": "1"})));
        assert_eq!(record.secondary_last_close, Some(None));

        let bad_symbol: TickerEntry = serde_json::from_value(json!({"ticker": 7, "sector": "Energy"})).unwrap();
        assert!(matches!(bad_symbol, TickerEntry::Malformed(_)));
    }

    #[test]
    fn test_normalize_classification() {
        let mut record = TickerRecord::dummy("MSFT").with_classification("", "Software");
        assert!(record.normalize_classification());
        assert_eq!(record.sector, NA);
        assert_eq!(record.industry, "Software");
        assert!(!record.normalize_classification());
    }
}
