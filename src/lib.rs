//! Historical stock prices with moving averages, Bollinger Bands and CSV export.
//!
//! The indicator engine ([`series`], [`indicators`], [`export`]) knows nothing
//! about the network or the terminal. [`pipeline`] runs one request against a
//! [`market_data::MarketDataSource`]; [`tui`] and [`comfy_table`] display it.

pub mod comfy_table;
pub mod export;
pub mod indicators;
pub mod market_data;
pub mod pipeline;
pub mod presentation;
pub mod series;
pub mod storage_utils;
pub mod tui;
