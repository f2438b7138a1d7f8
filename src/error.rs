// basecall-watch/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Problems detected before the watch loop starts. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown basecalling preset '{0}' (expected one of: {1})")]
    UnknownBasecallPreset(String, String),
    #[error("unknown barcoding preset '{0}' (expected one of: {1})")]
    UnknownBarcodePreset(String, String),
    #[error("{0} must be a positive integer")]
    NotPositive(&'static str),
    #[error("{0} is too large")]
    TooLarge(&'static str),
    #[error("input path is not a directory: {}", .0.display())]
    InputNotDirectory(PathBuf),
    #[error("output path exists and is not a directory: {}", .0.display())]
    OutputIsFile(PathBuf),
    #[error("config file not found: {}", .0.display())]
    MissingConfigFile(PathBuf),
    #[error("invalid config file {}: {message}", .path.display())]
    InvalidConfigFile { path: PathBuf, message: String },
}

/// The external basecaller did not complete successfully.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Spawn { program: String, #[source] source: std::io::Error },
    #[error("{program} exited with status {code}")]
    Failed { program: String, code: i32 },
    #[error("{program} was terminated by a signal")]
    Killed { program: String },
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("basecaller output has no {0}")]
    MissingArtifact(&'static str),
    #[error("{} does not start with a header line", .0.display())]
    MissingHeader(PathBuf),
}
