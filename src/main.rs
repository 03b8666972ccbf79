use anyhow::anyhow;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use stock_viewer::market_data::{MarketDataSource, YahooClient};
use stock_viewer::pipeline::{self, RequestParams, Severity};
use stock_viewer::presentation::Theme;
use stock_viewer::storage_utils::{AppConfig, AsyncStorageManager};
use stock_viewer::{comfy_table, tui};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stock-viewer")]
#[command(about = "Historical stock prices with moving averages and Bollinger Bands")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch once, print the raw data table and optionally write the CSV
    Show(ShowArgs),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Stock symbol (e.g. AAPL, TSLA, INFY.NS)
    #[arg(short, long)]
    ticker: Option<String>,

    /// Start date, YYYY-MM-DD
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date, YYYY-MM-DD (exclusive; defaults to today)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Add the two moving averages
    #[arg(long)]
    ma: bool,

    #[arg(long)]
    ma1: Option<usize>,

    #[arg(long)]
    ma2: Option<usize>,

    /// Add 20-period Bollinger Bands
    #[arg(long)]
    bollinger: bool,

    /// Print a volume bar block under the raw-data table
    #[arg(long)]
    volume: bool,

    #[arg(long, value_enum)]
    theme: Option<Theme>,

    /// Write {ticker}_data.csv into the export directory
    #[arg(long)]
    export: bool,

    /// Number of most recent rows to print
    #[arg(long, default_value = "20")]
    rows: usize,
}

impl ShowArgs {
    fn apply(&self, params: &mut RequestParams) {
        if let Some(ticker) = &self.ticker {
            params.ticker = ticker.clone();
        }
        if let Some(start) = self.start {
            params.start = start;
        }
        if let Some(end) = self.end {
            params.end = end;
        }
        params.show_moving_averages = self.ma;
        if let Some(ma1) = self.ma1 {
            params.ma_windows[0] = ma1;
        }
        if let Some(ma2) = self.ma2 {
            params.ma_windows[1] = ma2;
        }
        params.show_bollinger = self.bollinger;
        params.show_volume = self.volume;
        if let Some(theme) = self.theme {
            params.theme = theme;
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[derive(Debug, PartialEq)]
enum LogSink {
    File(PathBuf),
    Stderr,
}

/// The UI owns the terminal, so its logs go to a file in the storage directory.
fn log_sink(command: &Option<Command>, storage_dir: &Path) -> LogSink {
    match command {
        None => LogSink::File(storage_dir.join("stock-viewer.log")),
        Some(Command::Show(_)) => LogSink::Stderr,
    }
}

fn init_logging(sink: &LogSink) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match sink {
        LogSink::File(path) => {
            let log_file = std::fs::File::create(path)?;
            builder.with_writer(Mutex::new(log_file)).with_ansi(false).init();
        }
        LogSink::Stderr => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let storage = AsyncStorageManager::new_relative("storage").await?;
    init_logging(&log_sink(&cli.command, &storage.base_dir))?;

    let config: AppConfig = storage.load_or_init("config").await?;
    let exports = storage.child(&config.export.directory).await?;

    let defaults = RequestParams::from_config(&config, Local::now().date_naive());
    let source: Arc<dyn MarketDataSource> = Arc::new(YahooClient::new(&config.data_source)?);

    match cli.command {
        None => {
            info!("Starting UI with storage at {:?}", storage.base_dir);
            tui::run_tui(defaults, source, exports).await
        }
        Some(Command::Show(args)) => {
            let mut params = defaults;
            args.apply(&mut params);

            let output = match pipeline::run(source.as_ref(), &params).await {
                Ok(output) => output,
                Err(e) if e.severity() == Severity::Warning => {
                    eprintln!("{}", e.user_message());
                    return Ok(());
                }
                Err(e) => return Err(anyhow!(e.user_message())),
            };

            comfy_table::run(&output, args.rows)?;

            if args.export {
                let path = exports
                    .save_text(&output.export_file_name(), &output.to_csv()?)
                    .await?;
                println!("Saved {}", path.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_args_override_defaults() {
        let cli = Cli::parse_from([
            "stock-viewer",
            "show",
            "--ticker",
            "TSLA",
            "--start",
            "2024-01-02",
            "--ma",
            "--ma1",
            "5",
            "--bollinger",
            "--theme",
            "dark",
        ]);
        let Some(Command::Show(args)) = cli.command else {
            panic!("expected show subcommand");
        };

        let mut params = RequestParams::from_config(
            &AppConfig::default(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );
        args.apply(&mut params);

        assert_eq!(params.ticker, "TSLA");
        assert_eq!(params.start, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(params.end, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(params.ma_windows, [5, 50]);
        assert!(params.show_moving_averages && params.show_bollinger && !params.show_volume);
        assert_eq!(params.theme, Theme::Dark);
        assert_eq!(args.rows, 20);
    }

    #[test]
    fn no_subcommand_launches_ui() {
        assert!(Cli::parse_from(["stock-viewer"]).command.is_none());
    }

    #[test]
    fn volume_flag_enables_volume_block() {
        let cli = Cli::parse_from(["stock-viewer", "show", "--volume"]);
        let Some(Command::Show(args)) = cli.command else {
            panic!("expected show subcommand");
        };
        let mut params = RequestParams::from_config(
            &AppConfig::default(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );
        args.apply(&mut params);
        assert!(params.show_volume);
    }

    #[test]
    fn log_sink_resolved_from_storage_dir() {
        let dir = Path::new("/tmp/stock-viewer-storage");
        assert_eq!(
            log_sink(&Cli::parse_from(["stock-viewer"]).command, dir),
            LogSink::File(dir.join("stock-viewer.log"))
        );
        assert_eq!(
            log_sink(&Cli::parse_from(["stock-viewer", "show"]).command, dir),
            LogSink::Stderr
        );
    }
}
