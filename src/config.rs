// basecall-watch/src/config.rs

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::ConfigError,
    invoke::Guppy,
    presets::{PresetTables, RunConfiguration},
};

pub const DEFAULT_BATCH_SIZE: u64 = 10;
pub const DEFAULT_STOP_TIME_MINUTES: u64 = 30;
pub const DEFAULT_TICK_SECS: u64 = 12;
pub const DEFAULT_EXTENSION: &str = "fast5";
pub const DEFAULT_GUPPY: &str = "guppy_basecaller";
pub const DEFAULT_DEVICE: &str = "auto";

/// Optional settings file. Every key may be omitted.
///
/// ```toml
/// [watch]
/// batch_size = 20
/// stop_time = 60
/// staging_dir = "/scratch/basecall"
///
/// [guppy]
/// executable = "/opt/ont-guppy/bin/guppy_basecaller"
/// device = "cuda:0"
/// extra_args = ["--num_callers", "4"]
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub watch: WatchConfig,
    pub guppy: GuppyConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub batch_size: Option<u64>,
    /// Minutes without new input before the watcher stops.
    pub stop_time: Option<u64>,
    pub tick_secs: Option<u64>,
    pub extension: Option<String>,
    pub staging_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GuppyConfig {
    pub executable: Option<PathBuf>,
    pub device: Option<String>,
    pub extra_args: Vec<String>,
}

/// Values given on the command line. They win over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub barcodes: String,
    pub model: String,
    pub batch_size: Option<u64>,
    pub stop_time: Option<u64>,
    pub config: Option<PathBuf>,
    pub guppy: Option<PathBuf>,
    pub device: Option<String>,
}

/// Fully validated settings for one process lifetime.
#[derive(Clone, Debug)]
pub struct Settings {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub run: RunConfiguration,
    pub batch_size: usize,
    pub stop_after: Duration,
    pub tick: Duration,
    pub extension: String,
    pub staging_dir: Option<PathBuf>,
    pub guppy: Guppy,
}

fn default_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "basecall-watch")?;
    Some(proj.config_dir().join("config.toml"))
}

/// Reads the explicit config file, or the per-user one if it exists.
pub fn load_file(explicit: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = match explicit {
        Some(p) if !p.is_file() => return Err(ConfigError::MissingConfigFile(p.to_path_buf())),
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.is_file() => p,
            _ => return Ok(FileConfig::default()),
        },
    };
    let invalid = |message: String| ConfigError::InvalidConfigFile { path: path.clone(), message };
    let text = fs::read_to_string(&path).map_err(|e| invalid(e.to_string()))?;
    toml::from_str(&text).map_err(|e| invalid(e.message().to_string()))
}

fn positive(v: u64, what: &'static str) -> Result<u64, ConfigError> {
    if v == 0 { Err(ConfigError::NotPositive(what)) } else { Ok(v) }
}

impl Settings {
    /// Command line over file over defaults, validated once.
    pub fn resolve(cli: Overrides, file: FileConfig, presets: &PresetTables) -> Result<Self, ConfigError> {
        let run = presets.resolve(&cli.model, &cli.barcodes)?;

        let batch_size = positive(cli.batch_size.or(file.watch.batch_size).unwrap_or(DEFAULT_BATCH_SIZE), "batch size")?;
        let stop_time = positive(cli.stop_time.or(file.watch.stop_time).unwrap_or(DEFAULT_STOP_TIME_MINUTES), "stop time")?;
        let tick = positive(file.watch.tick_secs.unwrap_or(DEFAULT_TICK_SECS), "tick_secs")?;
        let stop_secs = stop_time.checked_mul(60).ok_or(ConfigError::TooLarge("stop time"))?;

        if !cli.in_dir.is_dir() { return Err(ConfigError::InputNotDirectory(cli.in_dir)); }
        if cli.out_dir.exists() && !cli.out_dir.is_dir() { return Err(ConfigError::OutputIsFile(cli.out_dir)); }

        let mut guppy = Guppy::new(
            cli.guppy.or(file.guppy.executable).unwrap_or_else(|| PathBuf::from(DEFAULT_GUPPY)),
            cli.device.or(file.guppy.device).unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
        );
        guppy.extra_args = file.guppy.extra_args;

        Ok(Self {
            in_dir: cli.in_dir,
            out_dir: cli.out_dir,
            run,
            batch_size: batch_size as usize,
            stop_after: Duration::from_secs(stop_secs),
            tick: Duration::from_secs(tick),
            extension: file.watch.extension.unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            staging_dir: file.watch.staging_dir,
            guppy,
        })
    }
}
