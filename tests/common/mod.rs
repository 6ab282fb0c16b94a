#![allow(dead_code)]

use async_trait::async_trait;
use highlow_archive::models::TickerRecord;
use highlow_archive::providers::{ProviderError, QuoteProvider};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// 按代码返回固定记录的数据源，记录每个代码的调用次数
pub struct StubQuoteProvider {
    records: HashMap<String, TickerRecord>,
    failing: HashSet<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StubQuoteProvider {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_record(mut self, ticker: &str, sector: &str, industry: &str) -> Self {
        self.records.insert(
            ticker.to_string(),
            TickerRecord::dummy(ticker).with_classification(sector, industry),
        );
        self
    }

    /// 该代码的每次调用都返回临时性错误
    pub fn failing(mut self, ticker: &str) -> Self {
        self.failing.insert(ticker.to_string());
        self
    }

    pub fn calls_for(&self, ticker: &str) -> usize {
        self.calls.lock().unwrap().get(ticker).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl QuoteProvider for StubQuoteProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn lookup(&self, ticker: &str) -> Result<TickerRecord, ProviderError> {
        *self.calls.lock().unwrap().entry(ticker.to_string()).or_insert(0) += 1;
        if self.failing.contains(ticker) {
            return Err(ProviderError::transient(format!("{} is rate limited", ticker)));
        }
        self.records
            .get(ticker)
            .cloned()
            .ok_or_else(|| ProviderError::permanent(format!("unknown symbol {}", ticker)))
    }
}

fn list(tickers: Value) -> Value {
    let total = tickers.as_array().map_or(0, |a| a.len());
    json!({"error": false, "total": total, "tickers": tickers})
}

/// 只有 1 个月新高列表的快照
pub fn one_month_highs(tickers: Value) -> Value {
    let empty = json!({"highs": list(json!([])), "lows": list(json!([]))});
    json!({
        "1month": {"highs": list(tickers), "lows": list(json!([]))},
        "3month": empty.clone(),
        "6month": empty.clone(),
        "12month": empty
    })
}

pub fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}
