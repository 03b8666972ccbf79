//! Rolling-window indicators over a close-price series.
//!
//! Every function is pure. A position is defined only when the full window
//! ending there is present; gaps (missing or non-finite inputs) restart the
//! window instead of being averaged over.

use crate::series::{ColumnKey, SeriesError, SeriesStore};
use ta::indicators::SimpleMovingAverage;
use ta::{Next, Reset};
use thiserror::Error;

pub const BOLLINGER_WINDOW: usize = 20;
pub const BOLLINGER_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("window must be at least 1, got {0}")]
    InvalidWindow(usize),

    #[error("band multiplier must be finite, got {0}")]
    InvalidMultiplier(f64),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub middle: Vec<Option<f64>>,
    pub std_dev: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

fn present(value: &Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

pub fn simple_moving_average(
    series: &[Option<f64>],
    window: usize,
) -> Result<Vec<Option<f64>>, IndicatorError> {
    let mut sma =
        SimpleMovingAverage::new(window).map_err(|_| IndicatorError::InvalidWindow(window))?;
    let mut run = 0usize;

    let out = series
        .iter()
        .enumerate()
        .map(|(i, value)| match present(value) {
            Some(v) => {
                run += 1;
                // ta tracks the window; the emitted mean is the exact slice mean.
                sma.next(v);
                (run >= window).then(|| window_mean(&series[i + 1 - window..=i]))
            }
            None => {
                sma.reset();
                run = 0;
                None
            }
        })
        .collect();

    Ok(out)
}

fn window_mean(window: &[Option<f64>]) -> f64 {
    window.iter().filter_map(present).sum::<f64>() / window.len() as f64
}

/// Population standard deviation (divisor = window) over the trailing window.
pub fn rolling_std_dev(
    series: &[Option<f64>],
    window: usize,
) -> Result<Vec<Option<f64>>, IndicatorError> {
    let means = simple_moving_average(series, window)?;
    Ok(std_dev_around(series, &means, window))
}

fn std_dev_around(series: &[Option<f64>], means: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    means
        .iter()
        .enumerate()
        .map(|(i, mean)| {
            let mean = (*mean)?;
            let start = i + 1 - window;
            let sum_sq: f64 = series[start..=i]
                .iter()
                .filter_map(present)
                .map(|x| (x - mean).powi(2))
                .sum();
            Some((sum_sq / window as f64).max(0.0).sqrt())
        })
        .collect()
}

pub fn bollinger_bands(
    series: &[Option<f64>],
    window: usize,
    multiplier: f64,
) -> Result<BollingerBands, IndicatorError> {
    if !multiplier.is_finite() {
        return Err(IndicatorError::InvalidMultiplier(multiplier));
    }

    let middle = simple_moving_average(series, window)?;
    let std_dev = rolling_std_dev(series, window)?;

    let band = |sign: f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(&std_dev)
            .map(|(m, s)| Some((*m)? + sign * multiplier * (*s)?))
            .collect()
    };
    let upper = band(1.0);
    let lower = band(-1.0);

    Ok(BollingerBands {
        middle,
        std_dev,
        upper,
        lower,
    })
}

/// An indicator request against the close column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorSpec {
    MovingAverage { window: usize },
    Bollinger { window: usize, multiplier: f64 },
}

impl IndicatorSpec {
    pub fn default_bollinger() -> Self {
        IndicatorSpec::Bollinger {
            window: BOLLINGER_WINDOW,
            multiplier: BOLLINGER_MULTIPLIER,
        }
    }

    /// Columns this indicator appends, in append order.
    pub fn keys(&self) -> Vec<ColumnKey> {
        match *self {
            IndicatorSpec::MovingAverage { window } => vec![ColumnKey::moving_average(window)],
            IndicatorSpec::Bollinger { window, multiplier } => vec![
                ColumnKey::bollinger_upper(window, multiplier),
                ColumnKey::bollinger_lower(window, multiplier),
            ],
        }
    }
}

/// Computes `spec` over the close column and appends the result.
///
/// An indicator whose columns are already present is left untouched, so
/// requesting the same moving-average window twice yields a single column.
pub fn apply(store: &mut SeriesStore, spec: IndicatorSpec) -> Result<(), IndicatorError> {
    if spec.keys().iter().all(|key| store.contains(*key)) {
        return Ok(());
    }

    let close = store.values(ColumnKey::Close)?;
    match spec {
        IndicatorSpec::MovingAverage { window } => {
            let sma = simple_moving_average(&close, window)?;
            store.append(ColumnKey::moving_average(window), sma)?;
        }
        IndicatorSpec::Bollinger { window, multiplier } => {
            let bands = bollinger_bands(&close, window, multiplier)?;
            store.append(ColumnKey::bollinger_upper(window, multiplier), bands.upper)?;
            store.append(ColumnKey::bollinger_lower(window, multiplier), bands.lower)?;
        }
    }
    Ok(())
}
