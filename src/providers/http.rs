use async_trait::async_trait;
use log::debug;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use crate::errors::{ArchiveError, Result};
use crate::models::TickerRecord;
use crate::providers::{ProviderError, QuoteProvider, SecondaryProvider, SecondaryQuote};

/// 带频率限制的 JSON 接口客户端
struct JsonEndpoint {
    client: Client,
    base_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl JsonEndpoint {
    fn new(base_url: &str, min_interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ArchiveError::RequestError)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// 等待请求频率限制
    async fn wait_for_rate_limit(&self) {
        let now = Instant::now();
        let should_wait = {
            let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
            let should_wait = match *last {
                Some(instant) if instant.elapsed() < self.min_interval => {
                    Some(self.min_interval.saturating_sub(instant.elapsed()))
                }
                _ => None,
            };
            *last = Some(now);
            should_wait
        };

        if let Some(wait_time) = should_wait {
            debug!("Waiting {:?} for rate limit", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> std::result::Result<T, ProviderError> {
        self.wait_for_rate_limit().await;

        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("request to {} failed: {}", url, e)))?;

        let response = check_status(&url, response)?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::permanent(format!("invalid payload from {}: {}", url, e)))
    }
}

// 429 和 5xx 可重试，其余非成功状态不可重试
fn check_status(url: &str, response: Response) -> std::result::Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return Err(ProviderError::Transient {
            message: format!("{} returned HTTP {}", url, status),
            retry_after,
        });
    }

    Err(ProviderError::permanent(format!("{} returned HTTP {}", url, status)))
}

/// Retry-After 可以是秒数，也可以是 HTTP 日期
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value.trim()).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
}

/// 通过 HTTP 获取补全数据：`GET {base}/quote/{ticker}` 返回一条记录
pub struct HttpQuoteProvider {
    endpoint: JsonEndpoint,
}

impl HttpQuoteProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_min_interval(base_url, Duration::from_millis(500))
    }

    pub fn with_min_interval(base_url: &str, min_interval: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, min_interval)?,
        })
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn name(&self) -> &str {
        "http-quote"
    }

    async fn lookup(&self, ticker: &str) -> std::result::Result<TickerRecord, ProviderError> {
        debug!("Fetching quote summary for {}", ticker);
        let payload: Value = self.endpoint.get_json(&format!("quote/{}", ticker), &[]).await?;
        record_from_payload(ticker, payload)
    }
}

// 返回体可以省略 ticker，此时使用请求的代码
fn record_from_payload(ticker: &str, mut payload: Value) -> std::result::Result<TickerRecord, ProviderError> {
    if let Value::Object(fields) = &mut payload {
        fields
            .entry("ticker")
            .or_insert_with(|| Value::String(ticker.to_string()));
    }
    serde_json::from_value(payload)
        .map_err(|e| ProviderError::permanent(format!("invalid quote payload for {}: {}", ticker, e)))
}

#[derive(Deserialize)]
struct VolumeAverage {
    average: Option<f64>,
}

/// 第二数据源：`GET {base}/volume/{ticker}?period=` 与 `GET {base}/quote/{ticker}`
pub struct HttpSecondaryProvider {
    endpoint: JsonEndpoint,
}

impl HttpSecondaryProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(base_url, Duration::from_millis(500))?,
        })
    }
}

#[async_trait]
impl SecondaryProvider for HttpSecondaryProvider {
    fn name(&self) -> &str {
        "http-secondary"
    }

    async fn volume_average(&self, ticker: &str, period: &str) -> std::result::Result<f64, ProviderError> {
        let body: VolumeAverage = self
            .endpoint
            .get_json(&format!("volume/{}", ticker), &[("period", period)])
            .await?;
        body.average
            .ok_or_else(|| ProviderError::transient(format!("no {} volume average for {}", period, ticker)))
    }

    async fn quote(&self, ticker: &str) -> std::result::Result<SecondaryQuote, ProviderError> {
        self.endpoint.get_json(&format!("quote/{}", ticker), &[]).await
    }
}
