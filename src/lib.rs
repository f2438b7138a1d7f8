pub mod error;
pub mod presets;
pub mod config;
pub mod ledger;
pub mod discovery;
pub mod staging;
pub mod invoke;
pub mod merge;
pub mod stats;
pub mod controller;

pub use error::{ConfigError, MergeError, ToolError};
pub use presets::{Barcoding, BasecallPreset, PresetTables, RunConfiguration};
pub use config::{FileConfig, Overrides, Settings};
pub use ledger::Ledger;
pub use discovery::{Batch, Discovery, InputFile};
pub use staging::{stage, StagedBatch};
pub use invoke::{Basecaller, Guppy};
pub use merge::{label_for, merge, Label, MergeReport};
pub use stats::{BatchStats, SessionStats};
pub use controller::{Controller, LoopState, Outcome};
