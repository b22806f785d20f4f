use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, NaiveDate};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

/// Remote source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub api_url: String,
    pub timeout_secs: u64,
    /// Total attempts per window; `1` means a failed window is not retried.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://mmeq.akze.me/api/myanmar-quakes".to_string(),
            timeout_secs: 30,
            max_attempts: 1,
            retry_backoff_ms: 500,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Where and how far to export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub dir: PathBuf,
    pub start_year: i32,
    /// Fixed exclusive cutoff. When absent, "yesterday" (UTC) is used.
    pub end_date: Option<NaiveDate>,
    pub workers: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("quake_exports"),
            start_year: 1950,
            end_date: None,
            workers: 10,
        }
    }
}

impl ExportConfig {
    /// Exclusive upper bound for this run.
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        self.end_date
            .unwrap_or_else(|| today.pred_opt().unwrap_or(today))
    }
}

/// Inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Accepted numeric bounds for canonical records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    pub latitude: Range,
    pub longitude: Range,
    /// Kilometers.
    pub depth: Range,
    pub mag: Range,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            latitude: Range::new(-90.0, 90.0),
            longitude: Range::new(-180.0, 180.0),
            depth: Range::new(0.0, 700.0),
            mag: Range::new(0.0, 10.0),
        }
    }
}

/// Fixed offset of the local rendering (`time_mmt`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalTimeConfig {
    pub offset_minutes: i32,
}

impl Default for LocalTimeConfig {
    fn default() -> Self {
        // Myanmar Time, UTC+06:30, no DST.
        Self { offset_minutes: 390 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to `<dir>/quake-export.log`.
    pub file: bool,
    pub dir: PathBuf,
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            dir: PathBuf::from("logs"),
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [source]
/// api_url = "https://mmeq.akze.me/api/myanmar-quakes"
///
/// [export]
/// dir = "quake_exports"
/// start_year = 1950
/// workers = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub export: ExportConfig,
    pub bounds: BoundsConfig,
    pub local_time: LocalTimeConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the default location, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    /// Load config from `path`, or return defaults if it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the default location.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "quake-export", "quake-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self, cutoff: NaiveDate) -> Result<()> {
        if self.export.workers == 0 {
            bail!("export.workers must be at least 1");
        }
        if self.source.timeout_secs == 0 {
            bail!("source.timeout_secs must be at least 1");
        }
        if self.source.max_attempts == 0 {
            bail!("source.max_attempts must be at least 1");
        }
        if self.source.api_url.trim().is_empty() {
            bail!("source.api_url must not be empty");
        }

        let bounds = [
            ("latitude", self.bounds.latitude),
            ("longitude", self.bounds.longitude),
            ("depth", self.bounds.depth),
            ("mag", self.bounds.mag),
        ];
        for (name, range) in bounds {
            if !(range.min.is_finite() && range.max.is_finite()) || range.min > range.max {
                bail!("bounds.{name} is invalid: [{}, {}]", range.min, range.max);
            }
        }

        if self.local_time.offset_minutes.abs() >= 24 * 60 {
            bail!(
                "local_time.offset_minutes must be within ±24h, got {}",
                self.local_time.offset_minutes
            );
        }

        if self.export.start_year > cutoff.year() {
            bail!(
                "export.start_year {} is after the cutoff {}",
                self.export.start_year,
                cutoff
            );
        }

        Ok(())
    }
}
