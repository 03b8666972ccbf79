//! Maps a finished request onto chart traces and table rows.
//!
//! Nothing here draws; the TUI and the stdout printer consume these values.

use crate::pipeline::PipelineOutput;
use crate::series::{Column, ColumnKey, SeriesError, SeriesStore};
use ratatui::style::Color;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Color,
    pub foreground: Color,
}

impl Theme {
    pub fn palette(self) -> Palette {
        match self {
            Theme::Light => Palette {
                background: Color::Rgb(0xFF, 0xFF, 0xFF),
                foreground: Color::Rgb(0x00, 0x00, 0x00),
            },
            Theme::Dark => Palette {
                background: Color::Rgb(0x11, 0x11, 0x11),
                foreground: Color::Rgb(0xFF, 0xFF, 0xFF),
            },
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Theme::Light => "Light",
            Theme::Dark => "Dark",
        }
    }
}

pub const CLOSE_COLOR: Color = Color::Blue;
pub const MA1_COLOR: Color = Color::Rgb(0xFF, 0xA5, 0x00);
pub const MA2_COLOR: Color = Color::Green;
pub const BAND_COLOR: Color = Color::Rgb(0x80, 0x00, 0x80);
pub const VOLUME_COLOR: Color = Color::Gray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Line,
    Bar,
}

/// One series ready for plotting. `x` is the row position in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub name: String,
    pub color: Color,
    pub dashed: bool,
    pub kind: TraceKind,
    pub points: Vec<(f64, f64)>,
}

fn points(values: &[Option<f64>]) -> Vec<(f64, f64)> {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|y| y.is_finite()).map(|y| (i as f64, y)))
        .collect()
}

fn line(store: &SeriesStore, key: ColumnKey, color: Color, dashed: bool) -> Result<Trace, SeriesError> {
    Ok(Trace {
        name: key.to_string(),
        color,
        dashed,
        kind: TraceKind::Line,
        points: points(&store.values(key)?),
    })
}

/// Close always, then the two moving averages and the two bands when enabled.
pub fn price_traces(output: &PipelineOutput) -> Result<Vec<Trace>, SeriesError> {
    let store = &output.store;
    let params = &output.params;
    let mut traces = vec![line(store, ColumnKey::Close, CLOSE_COLOR, false)?];

    if params.show_moving_averages {
        let [ma1, ma2] = params.ma_windows;
        traces.push(line(store, ColumnKey::moving_average(ma1), MA1_COLOR, false)?);
        traces.push(line(store, ColumnKey::moving_average(ma2), MA2_COLOR, false)?);
    }

    if params.show_bollinger {
        let (upper, lower) = output.bollinger_keys();
        traces.push(line(store, upper, BAND_COLOR, true)?);
        traces.push(line(store, lower, BAND_COLOR, true)?);
    }

    Ok(traces)
}

pub fn volume_trace(output: &PipelineOutput) -> Result<Option<Trace>, SeriesError> {
    if !output.params.show_volume {
        return Ok(None);
    }
    Ok(Some(Trace {
        name: ColumnKey::Volume.to_string(),
        color: VOLUME_COLOR,
        dashed: false,
        kind: TraceKind::Bar,
        points: points(&output.store.values(ColumnKey::Volume)?),
    }))
}

pub fn price_title(ticker: &str) -> String {
    format!("{} Price Chart", ticker)
}

pub fn volume_title(ticker: &str) -> String {
    format!("{} Volume", ticker)
}

pub const DATE_AXIS_TITLE: &str = "Date";
pub const PRICE_AXIS_TITLE: &str = "Price (USD)";

/// Header and display rows for the raw-data table. Missing cells show as "-".
pub fn raw_rows(store: &SeriesStore) -> Result<(Vec<String>, Vec<Vec<String>>), SeriesError> {
    let keys: Vec<ColumnKey> = store.keys().collect();
    let columns = keys
        .iter()
        .map(|key| store.column(*key))
        .collect::<Result<Vec<_>, _>>()?;

    let mut header = vec![DATE_AXIS_TITLE.to_string()];
    header.extend(keys.iter().map(ToString::to_string));

    let rows = store
        .dates()
        .iter()
        .enumerate()
        .map(|(row, date)| {
            let mut cells = vec![date.format("%Y-%m-%d").to_string()];
            cells.extend(columns.iter().map(|column| match column {
                Column::Price(v) => v[row].map_or_else(|| "-".to_string(), |x| format!("{:.2}", x)),
                Column::Volume(v) => v[row].map_or_else(|| "-".to_string(), |x| x.to_string()),
            }));
            cells
        })
        .collect();

    Ok((header, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{self, RequestParams};
    use crate::series::Bar;
    use chrono::NaiveDate;

    fn output(show_ma: bool, show_bollinger: bool, show_volume: bool) -> PipelineOutput {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let bars = (0..30)
            .map(|i| Bar {
                date: start + chrono::Days::new(i),
                open: None,
                high: None,
                low: None,
                close: if i == 3 { None } else { Some(100.0 + i as f64) },
                volume: Some(1_000 * (i + 1)),
            })
            .collect();
        let params = RequestParams {
            ticker: "msft".to_string(),
            start,
            end: start + chrono::Days::new(30),
            show_moving_averages: show_ma,
            ma_windows: [5, 10],
            show_bollinger,
            show_volume,
            theme: Theme::Dark,
        };
        pipeline::compute(&params, SeriesStore::from_bars(bars).unwrap()).unwrap()
    }

    #[test]
    fn palettes_match_themes() {
        assert_eq!(Theme::Light.palette().background, Color::Rgb(255, 255, 255));
        assert_eq!(Theme::Light.palette().foreground, Color::Rgb(0, 0, 0));
        assert_eq!(Theme::Dark.palette().background, Color::Rgb(17, 17, 17));
        assert_eq!(Theme::Dark.palette().foreground, Color::Rgb(255, 255, 255));
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
    }

    #[test]
    fn close_only_by_default() {
        let traces = price_traces(&output(false, false, false)).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].name, "Close");
        assert_eq!(traces[0].color, CLOSE_COLOR);
        // The missing close is skipped rather than drawn at zero.
        assert_eq!(traces[0].points.len(), 29);
        assert!(traces[0].points.iter().all(|(_, y)| *y >= 100.0));
    }

    #[test]
    fn all_overlays_in_order() {
        let out = output(true, true, true);
        let traces = price_traces(&out).unwrap();
        let names: Vec<&str> = traces.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Close", "MA5", "MA10", "Upper Band(20,2)", "Lower Band(20,2)"]
        );
        assert!(traces[3].dashed && traces[4].dashed);
        assert!(!traces[1].dashed);
        assert_eq!(traces[1].color, MA1_COLOR);
        assert_eq!(traces[2].color, MA2_COLOR);

        let volume = volume_trace(&out).unwrap().unwrap();
        assert_eq!(volume.kind, TraceKind::Bar);
        assert_eq!(volume.points.len(), 30);
    }

    #[test]
    fn volume_hidden_unless_requested() {
        assert!(volume_trace(&output(false, false, false)).unwrap().is_none());
    }

    #[test]
    fn titles_use_ticker() {
        let out = output(false, false, false);
        assert_eq!(price_title(&out.ticker), "MSFT Price Chart");
        assert_eq!(volume_title(&out.ticker), "MSFT Volume");
    }

    #[test]
    fn raw_rows_format_cells() {
        let (header, rows) = raw_rows(&output(true, false, false).store).unwrap();
        assert_eq!(header[0], "Date");
        assert_eq!(header.last().unwrap(), "MA10");
        assert_eq!(rows.len(), 30);
        assert_eq!(rows[0][0], "2024-02-01");
        assert_eq!(rows[0][4], "100.00");
        assert_eq!(rows[3][4], "-");
        assert_eq!(rows[0][5], "1000");
    }
}
