// basecall-watch/src/discovery.rs

use anyhow::{Context, Result};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::ledger::Ledger;

/// One raw instrument file. `name` is its processing identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputFile {
    pub path: PathBuf,
    pub name: String,
}

/// Files selected for one loop iteration, in path order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    pub files: Vec<InputFile>,
}

impl Batch {
    pub fn len(&self) -> usize { self.files.len() }
    pub fn is_empty(&self) -> bool { self.files.is_empty() }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.files.iter().map(|f| f.name.as_str()) }
}

pub struct Discovery {
    root: PathBuf,
    extension: String,
    batch_size: usize,
}

impl Discovery {
    /// `root` is resolved to an absolute path here so discovered paths are absolute too.
    pub fn new(root: &Path, extension: impl Into<String>, batch_size: usize) -> Result<Self> {
        let root = root.canonicalize().with_context(|| format!("resolve input dir {}", root.display()))?;
        Ok(Self { root, extension: extension.into(), batch_size })
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Up to `batch_size` unprocessed files, sorted by path.
    ///
    /// Files may be appearing while we walk; anything missed now is picked up
    /// on the next call.
    pub fn next_batch(&self, ledger: &Ledger) -> Result<Batch> {
        let mut candidates = BTreeSet::<InputFile>::new();
        let walker = WalkDir::new(&self.root).follow_links(true).into_iter();
        for r in walker {
            let de = match r {
                Ok(d) => d,
                Err(e) if e.depth() == 0 => {
                    return Err(e).with_context(|| format!("scan input dir {}", self.root.display()));
                }
                Err(e) => { warn!(error = %e, "skipping unreadable entry"); continue; }
            };
            if !de.file_type().is_file() { continue; }
            let p = de.path();
            if p.extension().and_then(|x| x.to_str()) != Some(self.extension.as_str()) { continue; }
            let Some(name) = p.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %p.display(), "skipping file whose name is not valid UTF-8");
                continue;
            };
            if ledger.contains(name) { continue; }
            candidates.insert(InputFile { path: p.to_path_buf(), name: name.to_string() });
        }

        let mut seen = BTreeSet::<String>::new();
        let files: Vec<InputFile> = candidates
            .into_iter()
            .filter(|f| seen.insert(f.name.clone()))
            .take(self.batch_size)
            .collect();
        debug!(found = files.len(), root = %self.root.display(), "discovery scan");
        Ok(Batch { files })
    }
}
