// basecall-watch/src/presets.rs

use std::collections::BTreeMap;

use crate::error::ConfigError;

/// A Guppy basecalling configuration, optionally paired with a replacement model file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasecallPreset {
    pub name: &'static str,
    pub config: &'static str,
    pub model_file: Option<&'static str>,
}

impl BasecallPreset {
    pub fn args(&self) -> Vec<String> {
        let mut out = vec!["--config".to_string(), self.config.to_string()];
        if let Some(model) = self.model_file {
            out.push("--model_file".into());
            out.push(model.into());
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Barcoding {
    /// No demultiplexing: every record lands in `reads.fastq`.
    None,
    Kits { name: &'static str, kits: &'static str, trim: bool },
}

impl Barcoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Kits { name, .. } => name,
        }
    }

    pub fn is_enabled(&self) -> bool { !matches!(self, Self::None) }

    pub fn args(&self) -> Vec<String> {
        match self {
            Self::None => vec![],
            Self::Kits { kits, trim, .. } => {
                let mut out = vec!["--barcode_kits".to_string(), kits.to_string()];
                if *trim { out.push("--trim_barcodes".into()); }
                out
            }
        }
    }
}

/// The presets chosen for this run. Resolved once at startup and never changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfiguration {
    pub basecall: BasecallPreset,
    pub barcoding: Barcoding,
}

impl RunConfiguration {
    pub fn preset_args(&self) -> Vec<String> {
        let mut out = self.basecall.args();
        out.extend(self.barcoding.args());
        out
    }
}

/// Closed lookup tables for the two preset families. Keys are lowercase.
#[derive(Clone, Debug)]
pub struct PresetTables {
    basecalling: BTreeMap<&'static str, BasecallPreset>,
    barcoding: BTreeMap<&'static str, Barcoding>,
}

impl PresetTables {
    pub fn standard() -> Self {
        let basecalling = [
            ("r9.4_fast", "dna_r9.4.1_450bps_fast.cfg", None),
            ("r9.4_hac", "dna_r9.4.1_450bps_hac.cfg", None),
            ("r9.4_kp", "dna_r9.4.1_450bps_hac.cfg", Some("template_r9.4.1_450bps_hac_kp.jsn")),
            ("r10_fast", "dna_r10_450bps_fast.cfg", None),
            ("r10_hac", "dna_r10_450bps_hac.cfg", None),
            ("r10_kp", "dna_r10_450bps_hac.cfg", Some("template_r10_450bps_hac_kp.jsn")),
        ]
        .into_iter()
        .map(|(name, config, model_file)| (name, BasecallPreset { name, config, model_file }))
        .collect();

        let kit = |name, kits| (name, Barcoding::Kits { name, kits, trim: true });
        let barcoding = [
            kit("native_1-12", "EXP-NBD104"),
            kit("native_13-24", "EXP-NBD114"),
            kit("native_1-24", "EXP-NBD104 EXP-NBD114"),
            kit("rapid_1-12", "SQK-RBK004"),
            ("none", Barcoding::None),
        ]
        .into_iter()
        .collect();

        Self { basecalling, barcoding }
    }

    pub fn basecall(&self, name: &str) -> Result<&BasecallPreset, ConfigError> {
        self.basecalling.get(name.to_ascii_lowercase().as_str()).ok_or_else(|| {
            ConfigError::UnknownBasecallPreset(name.to_string(), join_keys(self.basecalling.keys()))
        })
    }

    pub fn barcoding(&self, name: &str) -> Result<&Barcoding, ConfigError> {
        self.barcoding.get(name.to_ascii_lowercase().as_str()).ok_or_else(|| {
            ConfigError::UnknownBarcodePreset(name.to_string(), join_keys(self.barcoding.keys()))
        })
    }

    pub fn resolve(&self, basecall: &str, barcoding: &str) -> Result<RunConfiguration, ConfigError> {
        Ok(RunConfiguration {
            basecall: self.basecall(basecall)?.clone(),
            barcoding: self.barcoding(barcoding)?.clone(),
        })
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a &'static str>) -> String {
    keys.copied().collect::<Vec<_>>().join(", ")
}
