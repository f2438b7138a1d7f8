// basecall-watch/src/stats.rs

use std::{collections::BTreeMap, fmt};

use crate::merge::{Label, MergeReport};

/// Read counts and lengths for one destination bin in one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinTally {
    pub records: u64,
    pub bases: u64,
    lengths: Vec<u64>,
}

impl BinTally {
    /// Counts the four-line records in a fastq chunk; the sequence is the second line of each.
    pub fn observe_fastq(&mut self, content: &[u8]) {
        let lines = content.split(|b| *b == b'\n').filter(|l| !l.is_empty());
        for (i, line) in lines.enumerate() {
            if i % 4 != 1 { continue; }
            let len = line.strip_suffix(b"\r").unwrap_or(line).len() as u64;
            self.records += 1;
            self.bases += len;
            self.lengths.push(len);
        }
    }

    pub fn absorb(&mut self, other: &BinTally) {
        self.records += other.records;
        self.bases += other.bases;
        self.lengths.extend_from_slice(&other.lengths);
    }

    pub fn n50(&self) -> Option<u64> { n50(&self.lengths) }
}

/// Length of the read at which half of all bases are covered, longest reads first.
pub fn n50(lengths: &[u64]) -> Option<u64> {
    let total: u64 = lengths.iter().sum();
    if total == 0 { return None; }
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let target = total / 2;
    let mut so_far = 0;
    for len in sorted {
        so_far += len;
        if so_far >= target { return Some(len); }
    }
    None
}

const LENGTH_COLUMN: &str = "sequence_length_template";
const DURATION_COLUMN: &str = "duration";

/// Bases and pore time from summary rows, for translocation speed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeedTally {
    pub reads: u64,
    pub bases: u64,
    pub seconds: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeedColumns { length: usize, duration: usize }

impl SpeedColumns {
    pub fn from_header(header: &str) -> Option<Self> {
        let cols: Vec<&str> = header.trim_end().split('\t').collect();
        let length = cols.iter().position(|c| *c == LENGTH_COLUMN)?;
        let duration = cols.iter().position(|c| *c == DURATION_COLUMN)?;
        Some(Self { length, duration })
    }
}

impl SpeedTally {
    /// Rows with unparseable or non-positive values are ignored.
    pub fn observe_row(&mut self, cols: SpeedColumns, row: &str) {
        let fields: Vec<&str> = row.trim_end().split('\t').collect();
        let len = fields.get(cols.length).and_then(|v| v.parse::<u64>().ok());
        let dur = fields.get(cols.duration).and_then(|v| v.parse::<f64>().ok());
        if let (Some(len), Some(dur)) = (len, dur) {
            if dur > 0.0 {
                self.reads += 1;
                self.bases += len;
                self.seconds += dur;
            }
        }
    }

    pub fn absorb(&mut self, other: &SpeedTally) {
        self.reads += other.reads;
        self.bases += other.bases;
        self.seconds += other.seconds;
    }

    pub fn bases_per_second(&self) -> Option<f64> {
        (self.seconds > 0.0).then(|| self.bases as f64 / self.seconds)
    }
}

impl fmt::Display for SpeedTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bases_per_second() {
            Some(v) => write!(f, "{v:.1} b/s"),
            None => f.write_str("n/a"),
        }
    }
}

/// What the operator sees after each merged batch.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchStats {
    pub number: u64,
    pub files: usize,
    pub summary_rows: u64,
    pub reads_by_label: BTreeMap<Label, u64>,
    pub bases: u64,
    pub n50: Option<u64>,
    pub speed: SpeedTally,
}

impl BatchStats {
    pub fn new(number: u64, files: usize, report: &MergeReport) -> Self {
        let mut all = BinTally::default();
        for t in report.bins.values() { all.absorb(t); }
        Self {
            number,
            files,
            summary_rows: report.summary_rows(),
            reads_by_label: report.bins.iter().map(|(l, t)| (l.clone(), t.records)).collect(),
            bases: all.bases,
            n50: all.n50(),
            speed: report.speed.clone(),
        }
    }

    pub fn reads(&self) -> u64 { self.reads_by_label.values().sum() }
}

impl fmt::Display for BatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch {}: {} file{}, {} reads, {} bases", self.number, self.files, plural(self.files as u64), self.reads(), self.bases)?;
        if let Some(n50) = self.n50 { write!(f, ", N50 {n50} bp")?; }
        write!(f, ", translocation speed {}", self.speed)?;
        write_distribution(f, &self.reads_by_label)
    }
}

/// Running totals over every batch merged by this process.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub batches: u64,
    pub files: u64,
    pub reads_by_label: BTreeMap<Label, u64>,
    pub bases: u64,
    pub speed: SpeedTally,
}

impl SessionStats {
    pub fn record(&mut self, batch: &BatchStats) {
        self.batches += 1;
        self.files += batch.files as u64;
        for (label, reads) in &batch.reads_by_label {
            *self.reads_by_label.entry(label.clone()).or_default() += reads;
        }
        self.bases += batch.bases;
        self.speed.absorb(&batch.speed);
    }

    pub fn reads(&self) -> u64 { self.reads_by_label.values().sum() }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session: {} batch{}, {} file{}, {} reads, {} bases, translocation speed {}",
            self.batches, if self.batches == 1 { "" } else { "es" },
            self.files, plural(self.files),
            self.reads(), self.bases, self.speed,
        )?;
        write_distribution(f, &self.reads_by_label)
    }
}

/// One indented line per bin: read count and share of all reads.
fn write_distribution(f: &mut fmt::Formatter<'_>, reads_by_label: &BTreeMap<Label, u64>) -> fmt::Result {
    let total: u64 = reads_by_label.values().sum();
    if total == 0 { return Ok(()); }
    for (label, reads) in reads_by_label {
        let share = *reads as f64 * 100.0 / total as f64;
        write!(f, "\n  {:<14} {reads:>8} ({share:.1}%)", label.to_string())?;
    }
    Ok(())
}

pub(crate) fn plural(n: u64) -> &'static str { if n == 1 { "" } else { "s" } }
