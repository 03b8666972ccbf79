use crate::series::{Bar, SeriesError, SeriesStore};
use crate::storage_utils::DataSourceConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; stock-viewer)";

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by the data provider, try again later")]
    RateLimited,

    #[error("data provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("data provider error: {code} - {description}")]
    Api { code: String, description: String },

    #[error("malformed response: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Anything that can produce daily bars for a ticker and date range.
///
/// An empty store means the request succeeded but there were no rows.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_daily(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SeriesStore, RetrievalError>;
}

// --- Chart API payload ---

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    // Seconds east of UTC for the listing exchange.
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

fn cell<T: Copy>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).copied().flatten()
}

/// Converts a chart payload into bars ordered by exchange-local date.
///
/// "Not Found" (unknown or delisted symbol) is an empty result, not an error.
/// When two timestamps fall on the same date the later row wins.
pub fn bars_from_chart(response: ChartResponse) -> Result<Vec<Bar>, RetrievalError> {
    if let Some(error) = response.chart.error {
        if error.code == "Not Found" {
            debug!("Chart API reported no data: {}", error.description);
            return Ok(Vec::new());
        }
        return Err(RetrievalError::Api {
            code: error.code,
            description: error.description,
        });
    }

    let Some(data) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

    let mut by_date = BTreeMap::new();
    for (i, ts) in timestamps.into_iter().enumerate() {
        let Some(local) = DateTime::from_timestamp(ts + data.meta.gmtoffset, 0) else {
            warn!("Skipping out-of-range timestamp {}", ts);
            continue;
        };
        let date = local.date_naive();
        by_date.insert(
            date,
            Bar {
                date,
                open: cell(&quote.open, i),
                high: cell(&quote.high, i),
                low: cell(&quote.low, i),
                close: cell(&quote.close, i),
                volume: cell(&quote.volume, i),
            },
        );
    }

    Ok(by_date.into_values().collect())
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Yahoo Finance v8 chart endpoint.
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(config: &DataSourceConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    async fn fetch_daily(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SeriesStore, RetrievalError> {
        let url = format!("{}/{}", self.base_url, ticker);
        // The end date is exclusive.
        let query = [
            ("period1", unix_midnight(start).to_string()),
            ("period2", unix_midnight(end).to_string()),
            ("interval", "1d".to_string()),
            ("events", "history".to_string()),
        ];

        info!("Requesting daily bars for {} from {} to {}", ticker, start, end);
        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            warn!("Rate limited while fetching {} (HTTP {})", ticker, status);
            return Err(RetrievalError::RateLimited);
        }

        let body = response.text().await?;

        // Unknown symbols come back as 404 with a regular chart error body.
        let chart = match serde_json::from_str::<ChartResponse>(&body) {
            Ok(chart) => chart,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(RetrievalError::Status {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }
        };

        let bars = bars_from_chart(chart)?;
        info!("Received {} bars for {}", bars.len(), ticker);
        Ok(SeriesStore::from_bars(bars)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::ColumnKey;

    fn parse(json: &str) -> Result<Vec<Bar>, RetrievalError> {
        bars_from_chart(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn converts_quotes_and_keeps_nulls() {
        // 2024-01-02 14:30 UTC and 2024-01-03 14:30 UTC
        let json = r#"{"chart":{"result":[{
            "meta":{"symbol":"AAPL","gmtoffset":-18000},
            "timestamp":[1704205800,1704292200],
            "indicators":{"quote":[{
                "open":[187.15,184.22],
                "high":[188.44,null],
                "low":[183.89,183.43],
                "close":[185.64,184.25],
                "volume":[82488700,null]
            }]}
        }],"error":null}}"#;

        let bars = parse(json).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].close, Some(185.64));
        assert_eq!(bars[0].volume, Some(82_488_700));
        assert_eq!(bars[1].high, None);
        assert_eq!(bars[1].volume, None);

        let store = SeriesStore::from_bars(bars).unwrap();
        assert_eq!(store.values(ColumnKey::High).unwrap(), vec![Some(188.44), None]);
    }

    #[test]
    fn not_found_is_empty() {
        let json = r#"{"chart":{"result":null,"error":{
            "code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(parse(json).unwrap().is_empty());
    }

    #[test]
    fn other_chart_errors_propagate() {
        let json = r#"{"chart":{"result":null,"error":{
            "code":"Bad Request","description":"Invalid input - interval=1d is not supported"}}}"#;
        match parse(json) {
            Err(RetrievalError::Api { code, .. }) => assert_eq!(code, "Bad Request"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_timestamps_is_empty() {
        let json = r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse(json).unwrap().is_empty());
    }

    #[test]
    fn repeated_date_keeps_last_row() {
        // Two timestamps on 2024-01-02 UTC.
        let json = r#"{"chart":{"result":[{
            "meta":{"gmtoffset":0},
            "timestamp":[1704205800,1704218400],
            "indicators":{"quote":[{"close":[1.0,2.0]}]}
        }],"error":null}}"#;
        let bars = parse(json).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Some(2.0));
        assert_eq!(bars[0].open, None);
    }

    #[test]
    fn request_bounds_are_utc_midnight() {
        assert_eq!(unix_midnight(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()), 1_672_531_200);
    }
}
