// basecall-watch/src/merge.rs

use anyhow::{Context, Result};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt, fs,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    error::MergeError,
    presets::Barcoding,
    stats::{BinTally, SpeedColumns, SpeedTally},
};

pub const LOG_DIR: &str = "guppy_logs";
pub const TELEMETRY_DIR: &str = "guppy_telemetry";

/// A header-bearing, tab-delimited table that is concatenated across batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableKind {
    pub file_name: &'static str,
    /// Literal prefix of the header line (the first column's name).
    pub header_prefix: &'static str,
}

pub const SEQUENCING_SUMMARY: TableKind = TableKind { file_name: "sequencing_summary.txt", header_prefix: "filename" };
pub const BARCODING_SUMMARY: TableKind = TableKind { file_name: "barcoding_summary.txt", header_prefix: "read_id" };

static LOG_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}").expect("literal regex"));
static BARCODE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"barcode(\d{2})(?:\D|$)").expect("literal regex"));

/// Where a record file's content ends up.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    /// Two-digit barcode number, e.g. `"07"`.
    Barcode(String),
    Unclassified,
    /// Barcoding disabled for the run.
    Unbarcoded,
}

impl Label {
    pub fn file_name(&self) -> String { format!("{self}.fastq") }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Barcode(n) => write!(f, "barcode{n}"),
            Label::Unclassified => f.write_str("unclassified"),
            Label::Unbarcoded => f.write_str("reads"),
        }
    }
}

/// Barcode label found in `name`, or [`Label::Unclassified`] when there is none.
pub fn label_for(name: &str) -> Label {
    BARCODE_LABEL
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| Label::Barcode(m.as_str().to_string()))
        .unwrap_or(Label::Unclassified)
}

pub fn route(rel_path: &Path, barcoding: &Barcoding) -> Label {
    if !barcoding.is_enabled() { return Label::Unbarcoded; }
    label_for(&rel_path.to_string_lossy())
}

/// Timestamp embedded in a Guppy log name, like `2019-05-24_11-13-04`.
pub fn log_timestamp(name: &str) -> Option<&str> {
    LOG_TIMESTAMP.find(name).map(|m| m.as_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Artifact {
    Log,
    Telemetry,
    Table(usize),
    Records,
}

const TABLES: [TableKind; 2] = [SEQUENCING_SUMMARY, BARCODING_SUMMARY];

fn classify(name: &str) -> Option<Artifact> {
    if let Some(i) = TABLES.iter().position(|t| t.file_name == name) {
        return Some(Artifact::Table(i));
    }
    if name.starts_with("sequencing_telemetry") { return Some(Artifact::Telemetry); }
    if name.ends_with(".log") { return Some(Artifact::Log); }
    if name.ends_with(".fastq") { return Some(Artifact::Records); }
    None
}

/// Batches merged into `out_dir` by earlier runs, counted as the distinct
/// timestamps among the collected tool logs.
pub fn completed_batches(out_dir: &Path) -> Result<u64> {
    let dir = out_dir.join(LOG_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
    };
    let mut stamps = BTreeSet::new();
    for e in entries {
        let e = e.with_context(|| format!("list {}", dir.display()))?;
        let name = e.file_name().to_string_lossy().into_owned();
        if let Some(ts) = log_timestamp(&name) { stamps.insert(ts.to_string()); }
    }
    Ok(stamps.len() as u64)
}

/// What one merge folded into the aggregate outputs.
#[derive(Clone, Debug, Default)]
pub struct MergeReport {
    pub logs: Vec<PathBuf>,
    pub telemetry: Vec<PathBuf>,
    /// Data rows appended, keyed by table file name.
    pub table_rows: BTreeMap<&'static str, u64>,
    pub bins: BTreeMap<Label, BinTally>,
    pub speed: SpeedTally,
}

impl MergeReport {
    pub fn summary_rows(&self) -> u64 { self.table_rows.get(SEQUENCING_SUMMARY.file_name).copied().unwrap_or(0) }
    pub fn records(&self) -> u64 { self.bins.values().map(|b| b.records).sum() }
}

/// Folds one tool run's output tree into the aggregate files under `out_dir`.
///
/// Nothing is written if the run produced no sequencing summary or a table
/// fragment lacks its header. Every write
/// appends; existing aggregate content is never rewritten.
pub fn merge(run_dir: &Path, out_dir: &Path, barcoding: &Barcoding) -> Result<MergeReport> {
    let mut found: Vec<(Artifact, PathBuf, PathBuf)> = vec![];
    for r in WalkDir::new(run_dir).sort_by_file_name() {
        let de = r.with_context(|| format!("scan basecaller output {}", run_dir.display()))?;
        if !de.file_type().is_file() { continue; }
        let p = de.path();
        let rel = p.strip_prefix(run_dir).unwrap_or(p).to_path_buf();
        let name = de.file_name().to_string_lossy();
        match classify(&name) {
            Some(kind) => found.push((kind, rel, p.to_path_buf())),
            None => debug!(file = %rel.display(), "ignoring basecaller output"),
        }
    }
    if !found.iter().any(|(k, ..)| *k == Artifact::Table(0)) {
        return Err(MergeError::MissingArtifact(SEQUENCING_SUMMARY.file_name).into());
    }
    for (kind, rel, src) in &found {
        if let Artifact::Table(i) = kind { check_header(src, rel, TABLES[*i])?; }
    }
    // logs first: telemetry names borrow their timestamp
    found.sort();

    let mut report = MergeReport::default();
    let mut stamp: Option<String> = None;
    for (kind, rel, src) in &found {
        match kind {
            Artifact::Log => {
                let name = file_name(src);
                if stamp.is_none() { stamp = log_timestamp(&name).map(String::from); }
                if let Some(dest) = copy_log(src, &out_dir.join(LOG_DIR), &name)? {
                    report.logs.push(dest);
                }
            }
            Artifact::Telemetry => {
                let ts = stamp.clone().unwrap_or_else(now_stamp);
                let dest = copy_telemetry(src, &out_dir.join(TELEMETRY_DIR), &ts)?;
                report.telemetry.push(dest);
            }
            Artifact::Table(i) => {
                let table = TABLES[*i];
                let rows = append_table(src, rel, out_dir, table, &mut report.speed)?;
                *report.table_rows.entry(table.file_name).or_default() += rows;
            }
            Artifact::Records => {
                let label = route(rel, barcoding);
                let content = fs::read(src).with_context(|| format!("read {}", src.display()))?;
                append_to_file(&out_dir.join(label.file_name()), &content)?;
                report.bins.entry(label).or_default().observe_fastq(&content);
            }
        }
    }
    debug!(
        logs = report.logs.len(),
        summary_rows = report.summary_rows(),
        records = report.records(),
        "merged basecaller output"
    );
    Ok(report)
}

fn file_name(p: &Path) -> String {
    p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn copy_log(src: &Path, dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let dest = dir.join(name);
    if dest.exists() {
        warn!(log = %dest.display(), "log already collected; keeping the existing copy");
        return Ok(None);
    }
    fs::copy(src, &dest).with_context(|| format!("copy {} -> {}", src.display(), dest.display()))?;
    Ok(Some(dest))
}

/// `sequencing_telemetry.js` becomes `sequencing_telemetry_<stamp>.js`, with a
/// counter appended if that name is taken.
fn copy_telemetry(src: &Path, dir: &Path, stamp: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let stem = src.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = src.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    let mut dest = dir.join(format!("{stem}_{stamp}{ext}"));
    let mut n = 1;
    while dest.exists() {
        dest = dir.join(format!("{stem}_{stamp}_{n}{ext}"));
        n += 1;
    }
    fs::copy(src, &dest).with_context(|| format!("copy {} -> {}", src.display(), dest.display()))?;
    Ok(dest)
}

/// A non-empty table fragment must open with its header line.
fn check_header(src: &Path, rel: &Path, table: TableKind) -> Result<()> {
    let f = fs::File::open(src).with_context(|| format!("open {}", src.display()))?;
    let mut first = String::new();
    let n = BufReader::new(f).read_line(&mut first).with_context(|| format!("read {}", src.display()))?;
    if n == 0 || first.starts_with(table.header_prefix) { return Ok(()); }
    Err(MergeError::MissingHeader(rel.to_path_buf()).into())
}

/// Appends a table fragment, keeping its header only when the aggregate is new.
/// Only the first line is a header; every later line is data.
/// Returns the number of data rows appended.
fn append_table(src: &Path, rel: &Path, out_dir: &Path, table: TableKind, speed: &mut SpeedTally) -> Result<u64> {
    let dest = out_dir.join(table.file_name);
    let text = fs::read_to_string(src).with_context(|| format!("read {}", src.display()))?;
    let mut lines = text.lines();
    let Some(header) = lines.next() else { return Ok(0) };
    if !header.starts_with(table.header_prefix) {
        return Err(MergeError::MissingHeader(rel.to_path_buf()).into());
    }
    let columns = if table == SEQUENCING_SUMMARY { SpeedColumns::from_header(header) } else { None };
    let fresh = fs::metadata(&dest).map(|m| m.len() == 0).unwrap_or(true);

    let mut out = String::with_capacity(text.len());
    if fresh {
        out.push_str(header);
        out.push('\n');
    }
    let mut rows = 0u64;
    for line in lines.filter(|l| !l.trim().is_empty()) {
        if let Some(cols) = columns { speed.observe_row(cols, line); }
        out.push_str(line);
        out.push('\n');
        rows += 1;
    }
    if !out.is_empty() { append_to_file(&dest, out.as_bytes())?; }
    Ok(rows)
}

/// Appends `bytes` as whole lines and syncs before returning.
fn append_to_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() { return Ok(()); }
    let mut f = fs::OpenOptions::new().create(true).append(true).open(path)
        .with_context(|| format!("open {}", path.display()))?;
    f.write_all(bytes).with_context(|| format!("append to {}", path.display()))?;
    if !bytes.ends_with(b"\n") { f.write_all(b"\n")?; }
    f.sync_data().with_context(|| format!("sync {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "filename\tread_id\tduration\tsequence_length_template";

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn kits() -> Barcoding {
        Barcoding::Kits { name: "native_1-12", kits: "EXP-NBD104", trim: true }
    }

    #[test]
    fn labels_from_names() {
        assert_eq!(label_for("fastq_runid_abc_barcode07_0.fastq"), Label::Barcode("07".into()));
        assert_eq!(label_for("barcode12/fastq_runid_abc_0.fastq"), Label::Barcode("12".into()));
        assert_eq!(label_for("fastq_runid_abc_0.fastq"), Label::Unclassified);
        assert_eq!(label_for("barcode7_0.fastq"), Label::Unclassified);
        assert_eq!(label_for("barcode123.fastq"), Label::Unclassified);
        assert_eq!(Label::Barcode("07".into()).file_name(), "barcode07.fastq");
        assert_eq!(Label::Unclassified.file_name(), "unclassified.fastq");
        assert_eq!(Label::Unbarcoded.file_name(), "reads.fastq");
    }

    #[test]
    fn disabled_barcoding_routes_everything_to_reads() {
        let p = Path::new("barcode01/x_barcode01.fastq");
        assert_eq!(route(p, &Barcoding::None), Label::Unbarcoded);
        assert_eq!(route(p, &kits()), Label::Barcode("01".into()));
    }

    #[test]
    fn timestamp_from_log_name() {
        assert_eq!(log_timestamp("guppy_basecaller_log-2019-05-24_11-13-04.log"), Some("2019-05-24_11-13-04"));
        assert_eq!(log_timestamp("guppy.log"), None);
    }

    #[test]
    fn header_is_written_once_across_fragments() {
        let out = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let run = tempfile::tempdir().unwrap();
            write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\nf{i}.fast5\tr{i}a\t1.0\t100\nf{i}.fast5\tr{i}b\t1.0\t100\n"));
            let report = merge(run.path(), out.path(), &kits()).unwrap();
            assert_eq!(report.summary_rows(), 2);
        }
        let text = fs::read_to_string(out.path().join("sequencing_summary.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.iter().filter(|l| l.starts_with("filename")).count(), 1);
        assert!(lines[1].starts_with("f0.fast5") && lines[6].starts_with("f2.fast5\tr2b"));
    }

    #[test]
    fn records_are_appended_per_label() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\n"));
        write(run.path(), "pass/barcode01/fastq_runid_x_0.fastq", "@a\nACGT\n+\nIIII\n");
        write(run.path(), "pass/barcode01/fastq_runid_x_1.fastq", "@b\nAC\n+\nII");
        write(run.path(), "pass/unclassified/fastq_runid_x_0.fastq", "@c\nA\n+\nI\n");
        let report = merge(run.path(), out.path(), &kits()).unwrap();

        let b01 = fs::read_to_string(out.path().join("barcode01.fastq")).unwrap();
        assert_eq!(b01, "@a\nACGT\n+\nIIII\n@b\nAC\n+\nII\n");
        assert!(out.path().join("unclassified.fastq").exists());
        assert_eq!(report.bins[&Label::Barcode("01".into())].records, 2);
        assert_eq!(report.records(), 3);

        // a second batch only adds
        let run2 = tempfile::tempdir().unwrap();
        write(run2.path(), "sequencing_summary.txt", &format!("{HEADER}\n"));
        write(run2.path(), "pass/barcode01/fastq_runid_y_0.fastq", "@d\nGG\n+\nII\n");
        merge(run2.path(), out.path(), &kits()).unwrap();
        let b01 = fs::read_to_string(out.path().join("barcode01.fastq")).unwrap();
        assert!(b01.starts_with("@a\nACGT\n+\nIIII\n@b\n"));
        assert!(b01.ends_with("@d\nGG\n+\nII\n"));
    }

    #[test]
    fn telemetry_takes_the_log_timestamp() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\n"));
        write(run.path(), "guppy_basecaller_log-2019-05-24_11-13-04.log", "log body");
        write(run.path(), "sequencing_telemetry.js", "{}");
        let report = merge(run.path(), out.path(), &Barcoding::None).unwrap();

        assert_eq!(
            fs::read_to_string(out.path().join(LOG_DIR).join("guppy_basecaller_log-2019-05-24_11-13-04.log")).unwrap(),
            "log body"
        );
        let tel = out.path().join(TELEMETRY_DIR).join("sequencing_telemetry_2019-05-24_11-13-04.js");
        assert!(tel.exists());
        assert_eq!(report.telemetry, vec![tel.clone()]);

        // same run merged again never overwrites
        let again = merge(run.path(), out.path(), &Barcoding::None).unwrap();
        assert!(again.logs.is_empty());
        assert_eq!(again.telemetry[0], out.path().join(TELEMETRY_DIR).join("sequencing_telemetry_2019-05-24_11-13-04_1.js"));
    }

    #[test]
    fn telemetry_without_log_uses_current_time() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\n"));
        write(run.path(), "sequencing_telemetry.js", "{}");
        let report = merge(run.path(), out.path(), &Barcoding::None).unwrap();
        let name = file_name(&report.telemetry[0]);
        assert!(log_timestamp(&name).is_some(), "{name}");
    }

    #[test]
    fn missing_summary_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "guppy_basecaller_log-2019-05-24_11-13-04.log", "log");
        write(run.path(), "fastq_runid_x_0.fastq", "@a\nA\n+\nI\n");
        let err = merge(run.path(), out.path(), &Barcoding::None).unwrap_err();
        assert!(matches!(err.downcast_ref::<MergeError>(), Some(MergeError::MissingArtifact(_))));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn barcoding_summary_also_dedups_its_header() {
        let out = tempfile::tempdir().unwrap();
        for id in ["r1", "r2"] {
            let run = tempfile::tempdir().unwrap();
            write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\n"));
            write(run.path(), "barcoding_summary.txt", &format!("read_id\tbarcode_arrangement\n{id}\tbarcode01\n"));
            merge(run.path(), out.path(), &kits()).unwrap();
        }
        let text = fs::read_to_string(out.path().join("barcoding_summary.txt")).unwrap();
        assert_eq!(text, "read_id\tbarcode_arrangement\nr1\tbarcode01\nr2\tbarcode01\n");
    }

    #[test]
    fn summary_rows_feed_translocation_speed() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\na\tr1\t2.0\t900\na\tr2\t1.0\t300\n"));
        let report = merge(run.path(), out.path(), &Barcoding::None).unwrap();
        assert_eq!(report.speed.bases_per_second(), Some(400.0));
    }

    #[test]
    fn data_rows_that_look_like_a_header_are_kept() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "sequencing_summary.txt", "filename\tread_id\nfilename_batch7.fast5\tr1\nother.fast5\tr2\n");
        write(run.path(), "barcoding_summary.txt", "read_id\tbarcode_arrangement\nread_id_42\tbarcode03\n");
        let report = merge(run.path(), out.path(), &kits()).unwrap();
        assert_eq!(report.summary_rows(), 2);

        let text = fs::read_to_string(out.path().join("sequencing_summary.txt")).unwrap();
        assert_eq!(text, "filename\tread_id\nfilename_batch7.fast5\tr1\nother.fast5\tr2\n");
        let bc = fs::read_to_string(out.path().join("barcoding_summary.txt")).unwrap();
        assert_eq!(bc, "read_id\tbarcode_arrangement\nread_id_42\tbarcode03\n");
    }

    #[test]
    fn headerless_fragment_is_rejected_before_any_write() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "guppy_basecaller_log-2019-05-24_11-13-04.log", "log");
        write(run.path(), "sequencing_summary.txt", "a.fast5\tr1\n");
        write(run.path(), "fastq_runid_x_0.fastq", "@a\nA\n+\nI\n");
        let err = merge(run.path(), out.path(), &Barcoding::None).unwrap_err();
        assert!(matches!(err.downcast_ref::<MergeError>(), Some(MergeError::MissingHeader(p)) if p == Path::new("sequencing_summary.txt")));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_fragment_adds_nothing() {
        let out = tempfile::tempdir().unwrap();
        let run = tempfile::tempdir().unwrap();
        write(run.path(), "sequencing_summary.txt", "");
        assert_eq!(merge(run.path(), out.path(), &Barcoding::None).unwrap().summary_rows(), 0);
        assert!(!out.path().join("sequencing_summary.txt").exists());
    }

    #[test]
    fn completed_batches_counts_distinct_log_runs() {
        let out = tempfile::tempdir().unwrap();
        assert_eq!(completed_batches(out.path()).unwrap(), 0);
        for ts in ["2019-05-24_11-13-04", "2019-05-24_11-20-51"] {
            let run = tempfile::tempdir().unwrap();
            write(run.path(), "sequencing_summary.txt", &format!("{HEADER}\n"));
            write(run.path(), &format!("guppy_basecaller_log-{ts}.log"), "log");
            merge(run.path(), out.path(), &Barcoding::None).unwrap();
        }
        write(&out.path().join(LOG_DIR), "notes.log", "no timestamp");
        assert_eq!(completed_batches(out.path()).unwrap(), 2);
    }
}
