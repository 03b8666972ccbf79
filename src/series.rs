//! Date-indexed OHLCV table.
//!
//! Columns are addressed by [`ColumnKey`] rather than by interpolated strings,
//! so `MA20` and a Bollinger band over 20 periods can never collide. The store
//! is built once from retrieved bars and afterwards only grows by appending
//! indicator columns.

use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Derived series that can be appended to a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorKind {
    MovingAverage { window: usize },
    BollingerUpper { window: usize, multiplier: f64 },
    BollingerLower { window: usize, multiplier: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnKey {
    Open,
    High,
    Low,
    Close,
    Volume,
    Indicator(IndicatorKind),
}

impl ColumnKey {
    pub const OHLCV: [ColumnKey; 5] = [
        ColumnKey::Open,
        ColumnKey::High,
        ColumnKey::Low,
        ColumnKey::Close,
        ColumnKey::Volume,
    ];

    pub fn moving_average(window: usize) -> Self {
        ColumnKey::Indicator(IndicatorKind::MovingAverage { window })
    }

    pub fn bollinger_upper(window: usize, multiplier: f64) -> Self {
        ColumnKey::Indicator(IndicatorKind::BollingerUpper { window, multiplier })
    }

    pub fn bollinger_lower(window: usize, multiplier: f64) -> Self {
        ColumnKey::Indicator(IndicatorKind::BollingerLower { window, multiplier })
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKey::Open => f.write_str("Open"),
            ColumnKey::High => f.write_str("High"),
            ColumnKey::Low => f.write_str("Low"),
            ColumnKey::Close => f.write_str("Close"),
            ColumnKey::Volume => f.write_str("Volume"),
            ColumnKey::Indicator(IndicatorKind::MovingAverage { window }) => {
                write!(f, "MA{}", window)
            }
            ColumnKey::Indicator(IndicatorKind::BollingerUpper { window, multiplier }) => {
                write!(f, "Upper Band({},{})", window, multiplier)
            }
            ColumnKey::Indicator(IndicatorKind::BollingerLower { window, multiplier }) => {
                write!(f, "Lower Band({},{})", window, multiplier)
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognised column label '{0}'")]
pub struct ParseColumnKeyError(pub String);

/// Parses "Upper Band(20,2)" style arguments into (window, multiplier).
fn parse_band_args(args: &str) -> Option<(usize, f64)> {
    let inner = args.strip_prefix('(')?.strip_suffix(')')?;
    let (window, multiplier) = inner.split_once(',')?;
    let window = window.trim().parse::<usize>().ok()?;
    let multiplier = multiplier.trim().parse::<f64>().ok()?;
    Some((window, multiplier))
}

impl FromStr for ColumnKey {
    type Err = ParseColumnKeyError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseColumnKeyError(label.to_string());
        let label_trimmed = label.trim();

        match label_trimmed {
            "Open" => return Ok(ColumnKey::Open),
            "High" => return Ok(ColumnKey::High),
            "Low" => return Ok(ColumnKey::Low),
            "Close" => return Ok(ColumnKey::Close),
            "Volume" => return Ok(ColumnKey::Volume),
            _ => {}
        }

        if let Some(window) = label_trimmed.strip_prefix("MA") {
            let window = window.parse::<usize>().map_err(|_| unknown())?;
            return Ok(ColumnKey::moving_average(window));
        }
        if let Some(args) = label_trimmed.strip_prefix("Upper Band") {
            let (window, multiplier) = parse_band_args(args).ok_or_else(unknown)?;
            return Ok(ColumnKey::bollinger_upper(window, multiplier));
        }
        if let Some(args) = label_trimmed.strip_prefix("Lower Band") {
            let (window, multiplier) = parse_band_args(args).ok_or_else(unknown)?;
            return Ok(ColumnKey::bollinger_lower(window, multiplier));
        }

        Err(unknown())
    }
}

/// Cell storage for one column. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Price(Vec<Option<f64>>),
    Volume(Vec<Option<u64>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Price(v) => v.len(),
            Column::Volume(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The column widened to floating point.
    pub fn to_f64(&self) -> Vec<Option<f64>> {
        match self {
            Column::Price(v) => v.clone(),
            Column::Volume(v) => v.iter().map(|x| x.map(|n| n as f64)).collect(),
        }
    }
}

/// One retrieved trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("column {0} not found")]
    ColumnNotFound(ColumnKey),

    #[error("column {key} has {actual} values but the index has {expected} dates")]
    ShapeMismatch {
        key: ColumnKey,
        expected: usize,
        actual: usize,
    },

    #[error("column {0} already exists")]
    DuplicateColumn(ColumnKey),

    #[error("dates must be strictly increasing: {previous} is followed by {next}")]
    UnorderedDates { previous: NaiveDate, next: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStore {
    dates: Vec<NaiveDate>,
    columns: Vec<(ColumnKey, Column)>,
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl SeriesStore {
    /// A store with the OHLCV columns and no rows.
    pub fn empty() -> Self {
        Self {
            dates: Vec::new(),
            columns: vec![
                (ColumnKey::Open, Column::Price(Vec::new())),
                (ColumnKey::High, Column::Price(Vec::new())),
                (ColumnKey::Low, Column::Price(Vec::new())),
                (ColumnKey::Close, Column::Price(Vec::new())),
                (ColumnKey::Volume, Column::Volume(Vec::new())),
            ],
        }
    }

    pub fn from_bars(bars: Vec<Bar>) -> Result<Self, SeriesError> {
        let n = bars.len();
        let mut dates = Vec::with_capacity(n);
        let mut open = Vec::with_capacity(n);
        let mut high = Vec::with_capacity(n);
        let mut low = Vec::with_capacity(n);
        let mut close = Vec::with_capacity(n);
        let mut volume = Vec::with_capacity(n);

        for bar in bars {
            dates.push(bar.date);
            open.push(bar.open);
            high.push(bar.high);
            low.push(bar.low);
            close.push(bar.close);
            volume.push(bar.volume);
        }

        Self::new(
            dates,
            vec![
                (ColumnKey::Open, Column::Price(open)),
                (ColumnKey::High, Column::Price(high)),
                (ColumnKey::Low, Column::Price(low)),
                (ColumnKey::Close, Column::Price(close)),
                (ColumnKey::Volume, Column::Volume(volume)),
            ],
        )
    }

    /// Builds a store from an explicit column list, checking every invariant.
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<(ColumnKey, Column)>) -> Result<Self, SeriesError> {
        if let Some(pair) = dates.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(SeriesError::UnorderedDates {
                previous: pair[0],
                next: pair[1],
            });
        }

        let mut store = Self {
            dates,
            columns: Vec::with_capacity(columns.len()),
        };
        for (key, column) in columns {
            store.push_column(key, column)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Column keys in the order they were added.
    pub fn keys(&self) -> impl Iterator<Item = ColumnKey> + '_ {
        self.columns.iter().map(|(key, _)| *key)
    }

    pub fn contains(&self, key: ColumnKey) -> bool {
        self.columns.iter().any(|(k, _)| *k == key)
    }

    pub fn column(&self, key: ColumnKey) -> Result<&Column, SeriesError> {
        self.columns
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, column)| column)
            .ok_or(SeriesError::ColumnNotFound(key))
    }

    pub fn values(&self, key: ColumnKey) -> Result<Vec<Option<f64>>, SeriesError> {
        self.column(key).map(Column::to_f64)
    }

    /// Appends a numeric column aligned to the date index.
    pub fn append(&mut self, key: ColumnKey, values: Vec<Option<f64>>) -> Result<(), SeriesError> {
        self.push_column(key, Column::Price(values))
    }

    fn push_column(&mut self, key: ColumnKey, column: Column) -> Result<(), SeriesError> {
        if column.len() != self.dates.len() {
            return Err(SeriesError::ShapeMismatch {
                key,
                expected: self.dates.len(),
                actual: column.len(),
            });
        }
        if self.contains(key) {
            return Err(SeriesError::DuplicateColumn(key));
        }
        self.columns.push((key, column));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bar(d: u32, close: Option<f64>) -> Bar {
        Bar {
            date: day(d),
            open: close,
            high: close,
            low: close,
            close,
            volume: Some(1_000),
        }
    }

    #[test]
    fn empty_store_has_ohlcv_columns_and_no_rows() {
        let store = SeriesStore::empty();
        assert!(store.is_empty());
        assert_eq!(store.keys().collect::<Vec<_>>(), ColumnKey::OHLCV.to_vec());
    }

    #[test]
    fn from_bars_keeps_missing_values() {
        let store = SeriesStore::from_bars(vec![bar(2, Some(10.0)), bar(3, None)]).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.values(ColumnKey::Close).unwrap(), vec![Some(10.0), None]);
        assert_eq!(store.values(ColumnKey::Volume).unwrap(), vec![Some(1000.0), Some(1000.0)]);
    }

    #[test]
    fn from_bars_rejects_unordered_dates() {
        let err = SeriesStore::from_bars(vec![bar(3, Some(1.0)), bar(3, Some(2.0))]).unwrap_err();
        assert_eq!(
            err,
            SeriesError::UnorderedDates {
                previous: day(3),
                next: day(3)
            }
        );
    }

    #[test]
    fn append_checks_shape() {
        let mut store = SeriesStore::from_bars(vec![bar(2, Some(1.0)), bar(3, Some(2.0))]).unwrap();
        let key = ColumnKey::moving_average(2);
        let err = store.append(key, vec![None]).unwrap_err();
        assert_eq!(
            err,
            SeriesError::ShapeMismatch {
                key,
                expected: 2,
                actual: 1
            }
        );
        assert!(!store.contains(key));
    }

    #[test]
    fn append_rejects_duplicates_and_keeps_order() {
        let mut store = SeriesStore::from_bars(vec![bar(2, Some(1.0))]).unwrap();
        store.append(ColumnKey::moving_average(5), vec![None]).unwrap();
        store.append(ColumnKey::moving_average(1), vec![Some(1.0)]).unwrap();

        let err = store.append(ColumnKey::moving_average(5), vec![None]).unwrap_err();
        assert_eq!(err, SeriesError::DuplicateColumn(ColumnKey::moving_average(5)));

        let keys: Vec<_> = store.keys().skip(5).collect();
        assert_eq!(keys, vec![ColumnKey::moving_average(5), ColumnKey::moving_average(1)]);
    }

    #[test]
    fn missing_column_is_reported() {
        let store = SeriesStore::empty();
        let key = ColumnKey::bollinger_upper(20, 2.0);
        assert_eq!(store.column(key).unwrap_err(), SeriesError::ColumnNotFound(key));
    }

    #[test]
    fn labels_round_trip() {
        let keys = [
            ColumnKey::Close,
            ColumnKey::Volume,
            ColumnKey::moving_average(50),
            ColumnKey::bollinger_upper(20, 2.0),
            ColumnKey::bollinger_lower(10, 1.5),
        ];
        for key in keys {
            let label = key.to_string();
            assert_eq!(label.parse::<ColumnKey>().unwrap(), key, "label {label}");
        }
        assert_eq!(ColumnKey::bollinger_upper(20, 2.0).to_string(), "Upper Band(20,2)");
        assert!("MAx".parse::<ColumnKey>().is_err());
        assert!("Adj Close".parse::<ColumnKey>().is_err());
    }
}
