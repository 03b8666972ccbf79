use crate::presentation::Theme;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

// CONFIGURATION STRUCTS
// storage/config.json deserializes straight into these.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DefaultsConfig {
    pub ticker: String,         // e.g., "AAPL", "INFY.NS"
    pub start_date: NaiveDate,  // end date always defaults to today
    pub ma_windows: [usize; 2], // e.g., [20, 50]
    pub theme: Theme,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataSourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub directory: String, // relative to the storage directory
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub defaults: DefaultsConfig,
    pub data_source: DataSourceConfig,
    pub export: ExportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig {
                ticker: "AAPL".to_string(),
                start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default(),
                ma_windows: [20, 50],
                theme: Theme::Light,
            },
            data_source: DataSourceConfig {
                base_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
                timeout_secs: 30,
            },
            export: ExportConfig {
                directory: "exports".to_string(),
            },
        }
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Resolves `relative_path` against the directory of the running binary
    /// and creates it if needed.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();

        // Create it once here so save/load never have to check.
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }

        Ok(Self { base_dir })
    }

    /// A manager for a subdirectory, e.g. the export folder.
    pub async fn child(&self, name: &str) -> anyhow::Result<Self> {
        Self::new(self.base_dir.join(name)).await
    }

    /// Writes `contents` to `file_name` through a temporary file so a crash
    /// never leaves a half-written file behind.
    pub async fn save_text(&self, file_name: &str, contents: &str) -> anyhow::Result<PathBuf> {
        let final_path = self.base_dir.join(file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        fs::write(&tmp_path, contents.as_bytes()).await?;
        fs::rename(&tmp_path, &final_path).await?;

        Ok(final_path)
    }

    /// Serializes `data` as pretty JSON into `{filename}.json`.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        self.save_text(&format!("{}.json", filename), &json).await?;
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // serde_json validates UTF-8 itself, so skip read_to_string.
        let content = fs::read(path).await?;

        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }

    /// Loads `{filename}.json`, writing `T::default()` first if it does not exist.
    pub async fn load_or_init<T>(&self, filename: &str) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let path = self.base_dir.join(format!("{}.json", filename));
        if !fs::try_exists(&path).await? {
            let defaults = T::default();
            self.save(filename, &defaults).await?;
            info!("Wrote default {} to {:?}", filename, path);
            return Ok(defaults);
        }
        self.load(filename).await
    }
}
