// basecall-watch/src/main.rs

use basecall_watch::{
    config::{self, Overrides, Settings},
    Controller, Outcome, PresetTables,
};
use clap::Parser;
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "basecall-watch", version, about = "Basecall fast5 files with Guppy as they appear, merging results into one output directory")]
struct Args {
    /// Directory searched recursively for fast5 files
    #[arg(long = "in_dir")]
    in_dir: PathBuf,
    /// Directory for the merged output (created if missing)
    #[arg(long = "out_dir")]
    out_dir: PathBuf,
    /// Barcoding preset: native_1-12 | native_13-24 | native_1-24 | rapid_1-12 | none
    #[arg(long)]
    barcodes: String,
    /// Basecalling preset: r9.4_fast | r9.4_hac | r9.4_kp | r10_fast | r10_hac | r10_kp
    #[arg(long)]
    model: String,
    /// Number of fast5 files to basecall per batch [default: 10]
    #[arg(long = "batch_size")]
    batch_size: Option<u64>,
    /// Stop after this many minutes without a new fast5 file [default: 30]
    #[arg(long = "stop_time")]
    stop_time: Option<u64>,
    /// TOML settings file (default: the per-user config file, if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to the guppy_basecaller executable
    #[arg(long)]
    guppy: Option<PathBuf>,
    /// Guppy --device value, e.g. auto or cuda:0
    #[arg(long)]
    device: Option<String>,
}

impl From<Args> for Overrides {
    fn from(a: Args) -> Self {
        Overrides {
            in_dir: a.in_dir,
            out_dir: a.out_dir,
            barcodes: a.barcodes,
            model: a.model,
            batch_size: a.batch_size,
            stop_time: a.stop_time,
            config: a.config,
            guppy: a.guppy,
            device: a.device,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args.into()).await {
        Ok(outcome) => {
            info!(?outcome, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Overrides) -> anyhow::Result<Outcome> {
    let file = config::load_file(cli.config.as_deref())?;
    let settings = Settings::resolve(cli, file, &PresetTables::standard())?;
    let guppy = Arc::new(settings.guppy.clone());

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    let mut controller = Controller::new(settings, guppy, rx)?;
    controller.run().await
}
