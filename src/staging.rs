// basecall-watch/src/staging.rs

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::debug;

use crate::discovery::Batch;

/// A private copy of one batch plus an empty directory for the tool's output.
///
/// Both live under one temporary directory that is removed when this value
/// is dropped, whichever way the iteration ends.
#[derive(Debug)]
pub struct StagedBatch {
    root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl StagedBatch {
    pub fn input_dir(&self) -> &Path { &self.input }
    pub fn output_dir(&self) -> &Path { &self.output }
    pub fn root(&self) -> &Path { self.root.path() }
}

/// Copies every file of `batch` into a fresh staging area.
///
/// `parent` selects where the temporary directory is created; `None` uses the
/// system temp location.
pub fn stage(batch: &Batch, parent: Option<&Path>) -> Result<StagedBatch> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("basecall-batch-");
    let root = match parent {
        Some(p) => {
            fs::create_dir_all(p).with_context(|| format!("create staging parent {}", p.display()))?;
            builder.tempdir_in(p)
        }
        None => builder.tempdir(),
    }
    .context("create staging directory")?;

    let input = root.path().join("input");
    let output = root.path().join("output");
    fs::create_dir(&input).with_context(|| format!("create {}", input.display()))?;
    fs::create_dir(&output).with_context(|| format!("create {}", output.display()))?;

    let mut bytes = 0u64;
    for f in &batch.files {
        let dest = input.join(&f.name);
        bytes += fs::copy(&f.path, &dest)
            .with_context(|| format!("stage {} -> {}", f.path.display(), dest.display()))?;
    }
    debug!(files = batch.len(), bytes, dir = %root.path().display(), "staged batch");
    Ok(StagedBatch { root, input, output })
}
