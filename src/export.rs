//! CSV export of a series store, and the matching reader.

use crate::series::{Column, ColumnKey, SeriesError, SeriesStore};
use chrono::NaiveDate;
use thiserror::Error;

pub const DATE_LABEL: &str = "Date";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("first column must be 'Date'")]
    MissingDateColumn,

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("invalid value '{value}' in column {column}")]
    InvalidNumber { column: String, value: String },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Download name for a ticker's export, e.g. `AAPL_data.csv`.
pub fn export_file_name(ticker: &str) -> String {
    format!("{}_data.csv", ticker.trim())
}

fn format_cell(column: &Column, row: usize) -> String {
    match column {
        Column::Price(values) => match values[row] {
            Some(v) if v.is_finite() => v.to_string(),
            _ => String::new(),
        },
        Column::Volume(values) => values[row].map(|v| v.to_string()).unwrap_or_default(),
    }
}

/// Renders the store as comma-separated text: a header row, then one row per
/// date. Missing cells are left empty.
pub fn write_csv(store: &SeriesStore) -> Result<String, ExportError> {
    let keys: Vec<ColumnKey> = store.keys().collect();
    let columns = keys
        .iter()
        .map(|key| store.column(*key))
        .collect::<Result<Vec<_>, _>>()?;

    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = Vec::with_capacity(keys.len() + 1);
    header.push(DATE_LABEL.to_string());
    header.extend(keys.iter().map(ToString::to_string));
    writer.write_record(&header)?;

    for (row, date) in store.dates().iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(date.format(DATE_FORMAT).to_string());
        record.extend(columns.iter().map(|column| format_cell(column, row)));
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

fn push_cell(column: &mut Column, key: ColumnKey, raw: &str) -> Result<(), ExportError> {
    let invalid = || ExportError::InvalidNumber {
        column: key.to_string(),
        value: raw.to_string(),
    };

    match column {
        Column::Price(values) if raw.is_empty() => values.push(None),
        Column::Price(values) => values.push(Some(raw.parse::<f64>().map_err(|_| invalid())?)),
        Column::Volume(values) if raw.is_empty() => values.push(None),
        Column::Volume(values) => values.push(Some(raw.parse::<u64>().map_err(|_| invalid())?)),
    }
    Ok(())
}

/// Parses text produced by [`write_csv`] back into a store.
pub fn read_csv(text: &str) -> Result<SeriesStore, ExportError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut labels = headers.iter();
    if labels.next().map(str::trim) != Some(DATE_LABEL) {
        return Err(ExportError::MissingDateColumn);
    }

    let keys = labels
        .map(|label| {
            label
                .parse::<ColumnKey>()
                .map_err(|_| ExportError::UnknownColumn(label.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns: Vec<Column> = keys
        .iter()
        .map(|key| match key {
            ColumnKey::Volume => Column::Volume(Vec::new()),
            _ => Column::Price(Vec::new()),
        })
        .collect();
    let mut dates = Vec::new();

    for record in reader.records() {
        let record = record?;

        let date_text = record.get(0).unwrap_or_default().trim();
        let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT)
            .map_err(|_| ExportError::InvalidDate(date_text.to_string()))?;
        dates.push(date);

        for (idx, (key, column)) in keys.iter().zip(columns.iter_mut()).enumerate() {
            let raw = record.get(idx + 1).unwrap_or_default().trim();
            push_cell(column, *key, raw)?;
        }
    }

    Ok(SeriesStore::new(dates, keys.into_iter().zip(columns).collect())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{self, IndicatorSpec};
    use crate::series::Bar;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, d).unwrap()
    }

    fn sample_store() -> SeriesStore {
        let closes = [150.25, 151.5, 149.75, 152.0];
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                date: day(i as u32 + 1),
                open: Some(c - 1.0),
                high: Some(c + 2.0),
                low: Some(c - 2.5),
                close: Some(*c),
                volume: if i == 1 { None } else { Some(1_000_000 + i as u64) },
            })
            .collect();
        SeriesStore::from_bars(bars).unwrap()
    }

    #[test]
    fn file_name_uses_ticker() {
        assert_eq!(export_file_name(" TSLA "), "TSLA_data.csv");
    }

    #[test]
    fn writes_header_and_rows() {
        let mut store = sample_store();
        indicators::apply(&mut store, IndicatorSpec::MovingAverage { window: 3 }).unwrap();

        let text = write_csv(&store).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Date,Open,High,Low,Close,Volume,MA3");
        assert_eq!(lines[1], "2023-03-01,149.25,152.25,147.75,150.25,1000000,");
        assert_eq!(lines[2], "2023-03-02,150.5,153.5,149,151.5,,");
        assert_eq!(lines.len(), 5);
        assert!(!text.contains("NaN"));
    }

    #[test]
    fn close_and_moving_average_round_trip() {
        let dates: Vec<_> = (1..=5).map(day).collect();
        let close = vec![Some(10.1), Some(20.2), Some(30.3), Some(40.4), Some(50.5)];
        let mut store =
            SeriesStore::new(dates, vec![(ColumnKey::Close, Column::Price(close.clone()))]).unwrap();
        indicators::apply(&mut store, IndicatorSpec::MovingAverage { window: 20 }).unwrap();
        indicators::apply(&mut store, IndicatorSpec::MovingAverage { window: 2 }).unwrap();

        let parsed = read_csv(&write_csv(&store).unwrap()).unwrap();

        assert_eq!(
            parsed.keys().collect::<Vec<_>>(),
            vec![
                ColumnKey::Close,
                ColumnKey::moving_average(20),
                ColumnKey::moving_average(2)
            ]
        );
        assert_eq!(parsed.dates(), store.dates());
        assert_eq!(parsed.values(ColumnKey::Close).unwrap(), close);
        assert_eq!(parsed.values(ColumnKey::moving_average(20)).unwrap(), vec![None; 5]);

        let ma2 = parsed.values(ColumnKey::moving_average(2)).unwrap();
        let expected = store.values(ColumnKey::moving_average(2)).unwrap();
        assert_eq!(ma2[0], None);
        for (a, e) in ma2.iter().zip(&expected).skip(1) {
            assert!((a.unwrap() - e.unwrap()).abs() < 1e-12);
        }
    }

    #[test]
    fn full_store_with_bands_round_trips() {
        let mut store = sample_store();
        indicators::apply(&mut store, IndicatorSpec::Bollinger { window: 2, multiplier: 2.0 }).unwrap();

        let text = write_csv(&store).unwrap();
        assert!(text.lines().next().unwrap().ends_with("\"Upper Band(2,2)\",\"Lower Band(2,2)\""));

        let parsed = read_csv(&text).unwrap();
        assert_eq!(parsed, store);
    }

    #[test]
    fn empty_store_exports_header_only() {
        let text = write_csv(&SeriesStore::empty()).unwrap();
        assert_eq!(text, "Date,Open,High,Low,Close,Volume\n");
        assert!(read_csv(&text).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            read_csv("Day,Close\n2023-01-01,1\n"),
            Err(ExportError::MissingDateColumn)
        ));
        assert!(matches!(
            read_csv("Date,Adj Close\n2023-01-01,1\n"),
            Err(ExportError::UnknownColumn(label)) if label == "Adj Close"
        ));
        assert!(matches!(
            read_csv("Date,Close\n01/02/2023,1\n"),
            Err(ExportError::InvalidDate(_))
        ));
        assert!(matches!(
            read_csv("Date,Volume\n2023-01-01,1.5\n"),
            Err(ExportError::InvalidNumber { .. })
        ));
    }
}
