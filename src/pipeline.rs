//! One request, end to end: validate parameters, retrieve bars, append the
//! requested indicators.
//!
//! Every failure is mapped onto [`PipelineError`] here so callers show exactly
//! one message per request.

use crate::export::{self, ExportError};
use crate::indicators::{self, BOLLINGER_MULTIPLIER, BOLLINGER_WINDOW, IndicatorError, IndicatorSpec};
use crate::market_data::{MarketDataSource, RetrievalError};
use crate::presentation::Theme;
use crate::series::{ColumnKey, SeriesError, SeriesStore};
use crate::storage_utils::AppConfig;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub show_moving_averages: bool,
    pub ma_windows: [usize; 2],
    pub show_bollinger: bool,
    pub show_volume: bool,
    pub theme: Theme,
}

impl RequestParams {
    /// Form defaults: configured ticker, start and windows, ending `today`.
    pub fn from_config(config: &AppConfig, today: NaiveDate) -> Self {
        Self {
            ticker: config.defaults.ticker.clone(),
            start: config.defaults.start_date,
            end: today,
            show_moving_averages: false,
            ma_windows: config.defaults.ma_windows,
            show_bollinger: false,
            show_volume: false,
            theme: config.defaults.theme,
        }
    }

    /// Indicators to append, in column order. Bollinger Bands always use
    /// their own 20-period window whatever the moving-average windows are.
    pub fn indicator_plan(&self) -> Vec<IndicatorSpec> {
        let mut plan = Vec::new();
        if self.show_moving_averages {
            plan.extend(
                self.ma_windows
                    .iter()
                    .map(|&window| IndicatorSpec::MovingAverage { window }),
            );
        }
        if self.show_bollinger {
            plan.push(IndicatorSpec::default_bollinger());
        }
        plan
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.ticker.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        if self.show_moving_averages {
            if let Some(&window) = self.ma_windows.iter().find(|&&w| w == 0) {
                return Err(PipelineError::InvalidWindow(window));
            }
        }
        if self.end < self.start {
            return Err(PipelineError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Please enter a stock symbol.")]
    EmptyInput,

    #[error("Moving-average windows must be at least 1 (got {0}).")]
    InvalidWindow(usize),

    #[error("End date {end} is before start date {start}.")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Error fetching data: {0}")]
    RetrievalFailure(#[from] RetrievalError),

    #[error("No data found for the given inputs.")]
    NoData,

    #[error("Unexpected error: {0}")]
    Internal(#[from] IndicatorError),
}

impl From<SeriesError> for PipelineError {
    fn from(err: SeriesError) -> Self {
        PipelineError::Internal(IndicatorError::Series(err))
    }
}

impl PipelineError {
    pub fn severity(&self) -> Severity {
        match self {
            PipelineError::RetrievalFailure(_) | PipelineError::Internal(_) => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// The single line shown to the user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// A successful request: the augmented store plus what was asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Upper-cased display form of the ticker.
    pub ticker: String,
    pub params: RequestParams,
    pub store: SeriesStore,
}

impl PipelineOutput {
    pub fn success_message(&self) -> String {
        format!(
            "Showing stock price for **{}** from {} to {}",
            self.ticker, self.params.start, self.params.end
        )
    }

    pub fn bollinger_keys(&self) -> (ColumnKey, ColumnKey) {
        (
            ColumnKey::bollinger_upper(BOLLINGER_WINDOW, BOLLINGER_MULTIPLIER),
            ColumnKey::bollinger_lower(BOLLINGER_WINDOW, BOLLINGER_MULTIPLIER),
        )
    }

    pub fn export_file_name(&self) -> String {
        export::export_file_name(&self.params.ticker)
    }

    pub fn to_csv(&self) -> Result<String, ExportError> {
        export::write_csv(&self.store)
    }
}

/// Indicator stage: appends the planned indicators to a non-empty store.
pub fn compute(params: &RequestParams, mut store: SeriesStore) -> Result<PipelineOutput, PipelineError> {
    if store.is_empty() {
        return Err(PipelineError::NoData);
    }

    for spec in params.indicator_plan() {
        indicators::apply(&mut store, spec)?;
    }

    Ok(PipelineOutput {
        ticker: params.ticker.trim().to_uppercase(),
        params: params.clone(),
        store,
    })
}

/// Runs one request against `source`. Nothing is retried.
pub async fn run<S>(source: &S, params: &RequestParams) -> Result<PipelineOutput, PipelineError>
where
    S: MarketDataSource + ?Sized,
{
    let result = execute(source, params).await;
    match &result {
        Ok(output) => info!(
            "{}: {} rows, {} columns",
            output.ticker,
            output.store.len(),
            output.store.keys().count()
        ),
        Err(e) if e.severity() == Severity::Warning => warn!("{}", e),
        Err(e) => error!("{}", e),
    }
    result
}

async fn execute<S>(source: &S, params: &RequestParams) -> Result<PipelineOutput, PipelineError>
where
    S: MarketDataSource + ?Sized,
{
    params.validate()?;

    let ticker = params.ticker.trim();
    let store = source.fetch_daily(ticker, params.start, params.end).await?;

    compute(params, store)
}
