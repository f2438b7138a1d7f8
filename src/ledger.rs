// basecall-watch/src/ledger.rs

use anyhow::{Context, Result};
use std::{
    collections::BTreeSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

pub const LEDGER_FILE: &str = "basecalled_filenames";

/// Append-only record of the input basenames whose results are already merged.
///
/// One basename per line. The in-memory set mirrors the file; entries are
/// only ever added, through [`Ledger::commit`].
#[derive(Clone, Debug)]
pub struct Ledger {
    path: PathBuf,
    names: BTreeSet<String>,
    // set when the file ends in a torn line, e.g. after a crash mid-append
    needs_newline: bool,
}

impl Ledger {
    pub fn in_dir(out_dir: &Path) -> Self {
        Self { path: out_dir.join(LEDGER_FILE), names: BTreeSet::new(), needs_newline: false }
    }

    /// Reads the ledger file. A missing file is an empty ledger.
    pub fn load(out_dir: &Path) -> Result<Self> {
        let mut ledger = Self::in_dir(out_dir);
        if !ledger.path.exists() { return Ok(ledger); }
        let data = fs::read_to_string(&ledger.path)
            .with_context(|| format!("read ledger {}", ledger.path.display()))?;
        ledger.needs_newline = !data.is_empty() && !data.ends_with('\n');
        // names are kept byte for byte; only the line terminator is dropped
        ledger.names = data.lines().filter(|l| !l.is_empty()).map(String::from).collect();
        debug!(path = %ledger.path.display(), entries = ledger.names.len(), "loaded ledger");
        Ok(ledger)
    }

    pub fn contains(&self, name: &str) -> bool { self.names.contains(name) }
    pub fn names(&self) -> &BTreeSet<String> { &self.names }
    pub fn len(&self) -> usize { self.names.len() }
    pub fn is_empty(&self) -> bool { self.names.is_empty() }
    pub fn path(&self) -> &Path { &self.path }

    /// Appends each name not already present and flushes to disk before returning.
    pub fn commit<I, S>(&mut self, names: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fresh: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| !self.names.contains(n))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if fresh.is_empty() { return Ok(0); }

        let mut text = String::new();
        if self.needs_newline { text.push('\n'); }
        for n in &fresh {
            text.push_str(n);
            text.push('\n');
        }
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&self.path)
            .with_context(|| format!("open ledger {}", self.path.display()))?;
        f.write_all(text.as_bytes())
            .and_then(|_| f.sync_data())
            .with_context(|| format!("append to ledger {}", self.path.display()))?;

        self.needs_newline = false;
        let added = fresh.len();
        self.names.extend(fresh);
        debug!(added, total = self.names.len(), "ledger commit");
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(dir.path()).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn commit_appends_and_reload_sees_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        assert_eq!(ledger.commit(["b.fast5", "a.fast5"]).unwrap(), 2);
        assert_eq!(ledger.commit(["c.fast5", "a.fast5"]).unwrap(), 1);

        let text = fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();
        assert_eq!(text, "a.fast5\nb.fast5\nc.fast5\n");

        let reloaded = Ledger::load(dir.path()).unwrap();
        assert_eq!(reloaded.names(), ledger.names());
        assert!(reloaded.contains("c.fast5"));
    }

    #[test]
    fn never_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        ledger.commit(["x.fast5"]).unwrap();
        let before = ledger.len();
        ledger.commit(Vec::<String>::new()).unwrap();
        ledger.commit(["x.fast5"]).unwrap();
        assert_eq!(ledger.len(), before);
        assert_eq!(Ledger::load(dir.path()).unwrap().len(), before);
    }

    #[test]
    fn torn_last_line_is_not_glued_to_the_next_commit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LEDGER_FILE), "a.fast5\nb.fa").unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        ledger.commit(["c.fast5"]).unwrap();
        let text = fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();
        assert_eq!(text, "a.fast5\nb.fa\nc.fast5\n");
    }

    #[test]
    fn tolerates_blank_lines_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LEDGER_FILE), "a.fast5\n\nb.fast5\r\n").unwrap();
        let ledger = Ledger::load(dir.path()).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("b.fast5"));
    }

    #[test]
    fn whitespace_in_names_survives_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        ledger.commit([" read.fast5", "tail .fast5"]).unwrap();

        let reloaded = Ledger::load(dir.path()).unwrap();
        assert!(reloaded.contains(" read.fast5"));
        assert!(reloaded.contains("tail .fast5"));
        assert!(!reloaded.contains("read.fast5"));
        assert_eq!(reloaded.names(), ledger.names());
    }
}
