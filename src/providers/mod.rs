//! 外部数据源接口：行情补全、第二数据源、板块/行业词表

pub mod http;
pub mod vocabulary;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::models::TickerRecord;

pub use http::{HttpQuoteProvider, HttpSecondaryProvider};
pub use vocabulary::{SectorIndustryMap, SectorVocabulary};

/// 数据源调用失败，区分可重试与不可重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transient provider failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProviderError::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// 行情补全数据源
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 获取单只股票的补全数据
    async fn lookup(&self, ticker: &str) -> Result<TickerRecord, ProviderError>;
}

/// 第二数据源返回的报价
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecondaryQuote {
    pub close: Option<f64>,
    #[serde(rename = "52WeekHigh")]
    pub high_52: Option<f64>,
    #[serde(rename = "52WeekLow")]
    pub low_52: Option<f64>,
}

/// 第二数据源：成交量均值、收盘价、52 周区间
#[async_trait]
pub trait SecondaryProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn volume_average(&self, ticker: &str, period: &str) -> Result<f64, ProviderError>;

    async fn quote(&self, ticker: &str) -> Result<SecondaryQuote, ProviderError>;
}

/// 重试策略：只重试临时性失败
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
    /// 每次调用前的固定等待
    pub call_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            call_delay: None,
        }
    }

    pub fn with_call_delay(mut self, delay: Option<Duration>) -> Self {
        self.call_delay = delay;
        self
    }

    /// 执行调用，失败时按策略等待后重试
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if let Some(delay) = self.call_delay {
                tokio::time::sleep(delay).await;
            }

            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err @ ProviderError::Permanent(_)) => return Err(err),
                Err(err) => err,
            };

            if attempt >= attempts {
                warn!("{}: giving up after {} attempts: {}", label, attempts, err);
                return Err(err);
            }

            let wait = match &err {
                ProviderError::Transient { retry_after: Some(hint), .. } => (*hint).max(self.backoff),
                _ => self.backoff,
            };
            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {:?}",
                label, attempt, attempts, err, wait
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result = policy
            .run("AAPL", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::transient("timeout"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(10, Duration::ZERO);

        let result: Result<(), _> = policy
            .run("Y", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::transient("rate limited")) }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(10, Duration::ZERO);

        let result: Result<(), _> = policy
            .run("BAD", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::permanent("unknown symbol")) }
            })
            .await;

        assert_eq!(result, Err(ProviderError::permanent("unknown symbol")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
