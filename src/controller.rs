// basecall-watch/src/controller.rs

use anyhow::{Context, Result};
use std::{fs, io::Write, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::Settings,
    discovery::{Batch, Discovery},
    invoke::Basecaller,
    ledger::Ledger,
    merge,
    stats::{plural, BatchStats, SessionStats},
    staging,
};

/// Where the watch loop stands between steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for input; carries how long nothing new has appeared.
    Idle(Duration),
    Active,
    Terminated,
}

impl LoopState {
    pub fn start() -> Self { Self::Idle(Duration::ZERO) }

    /// Idle for at least `stop_after` means the run is over.
    pub fn expire(self, stop_after: Duration) -> Self {
        match self {
            Self::Idle(e) if e >= stop_after => Self::Terminated,
            s => s,
        }
    }

    pub fn on_scan(self, found: bool) -> Self {
        match self {
            Self::Idle(_) if found => Self::Active,
            s => s,
        }
    }

    pub fn on_wait(self, tick: Duration) -> Self {
        match self {
            Self::Idle(e) => Self::Idle(e + tick),
            s => s,
        }
    }

    pub fn on_batch_done(self) -> Self {
        match self {
            Self::Active => Self::start(),
            s => s,
        }
    }
}

/// How a watch session ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    IdleTimeout { batches: u64 },
    Interrupted { batches: u64 },
}

enum BatchEnd { Merged, Interrupted }

pub struct Controller {
    settings: Settings,
    basecaller: Arc<dyn Basecaller>,
    discovery: Discovery,
    ledger: Ledger,
    shutdown: watch::Receiver<bool>,
    stats: SessionStats,
    // number given to this process's first batch
    first_batch: u64,
    waiting: bool,
}

impl Controller {
    /// Creates the output directory if needed and loads the ledger from it.
    pub fn new(settings: Settings, basecaller: Arc<dyn Basecaller>, shutdown: watch::Receiver<bool>) -> Result<Self> {
        fs::create_dir_all(&settings.out_dir)
            .with_context(|| format!("create output dir {}", settings.out_dir.display()))?;
        let ledger = Ledger::load(&settings.out_dir)?;
        let discovery = Discovery::new(&settings.in_dir, settings.extension.clone(), settings.batch_size)?;
        let first_batch = merge::completed_batches(&settings.out_dir)? + 1;
        info!(
            input = %discovery.root().display(),
            output = %settings.out_dir.display(),
            already_basecalled = ledger.len(),
            first_batch,
            basecalling = settings.run.basecall.name,
            barcoding = settings.run.barcoding.name(),
            "watcher ready"
        );
        Ok(Self {
            settings,
            basecaller,
            discovery,
            ledger,
            shutdown,
            stats: SessionStats::default(),
            first_batch,
            waiting: false,
        })
    }

    pub fn ledger(&self) -> &Ledger { &self.ledger }
    pub fn stats(&self) -> &SessionStats { &self.stats }

    /// Batch numbers continue from the batches already merged into the output directory.
    pub fn next_batch_number(&self) -> u64 { self.first_batch + self.stats.batches }

    pub async fn run(&mut self) -> Result<Outcome> {
        let mut state = LoopState::start();
        loop {
            state = state.expire(self.settings.stop_after);
            if state == LoopState::Terminated {
                let minutes = self.settings.stop_after.as_secs() / 60;
                println!("\nNo new reads for {minutes} minute{} - stopping", plural(minutes));
                self.log_session();
                return Ok(Outcome::IdleTimeout { batches: self.stats.batches });
            }
            if self.shutdown_requested() { return Ok(self.interrupted()); }

            let batch = self.discovery.next_batch(&self.ledger)?;
            state = state.on_scan(!batch.is_empty());
            match state {
                LoopState::Active => {
                    self.waiting = false;
                    if let BatchEnd::Interrupted = self.process(batch).await? {
                        return Ok(self.interrupted());
                    }
                    state = state.on_batch_done();
                }
                _ => {
                    self.show_waiting();
                    if self.wait(self.settings.tick).await { return Ok(self.interrupted()); }
                    state = state.on_wait(self.settings.tick);
                }
            }
        }
    }

    /// Stage, basecall, merge, then commit. The ledger is only touched once the merge succeeded.
    async fn process(&mut self, batch: Batch) -> Result<BatchEnd> {
        let number = self.next_batch_number();
        println!("\nFound {} new file{} (batch {number})", batch.len(), plural(batch.len() as u64));
        let staged = staging::stage(&batch, self.settings.staging_dir.as_deref())?;

        let called = self.basecaller.basecall(staged.input_dir(), staged.output_dir(), &self.settings.run).await;
        if let Err(e) = called {
            if self.shutdown_requested() {
                warn!(batch = number, error = %e, "basecaller stopped after interrupt; batch left unprocessed");
                return Ok(BatchEnd::Interrupted);
            }
            return Err(e).with_context(|| format!("basecalling batch {number}"));
        }

        let report = merge::merge(staged.output_dir(), &self.settings.out_dir, &self.settings.run.barcoding)
            .with_context(|| format!("merging batch {number}"))?;
        self.ledger.commit(batch.names())?;
        drop(staged);

        let stats = BatchStats::new(number, batch.len(), &report);
        println!("{stats}");
        info!(
            batch = number,
            files = stats.files,
            summary_rows = stats.summary_rows,
            reads = stats.reads(),
            bases = stats.bases,
            "batch merged"
        );
        self.stats.record(&stats);
        Ok(BatchEnd::Merged)
    }

    fn show_waiting(&mut self) {
        let mut out = std::io::stdout();
        if !self.waiting {
            let _ = write!(out, "Waiting for new reads");
            self.waiting = true;
        }
        let _ = write!(out, ".");
        let _ = out.flush();
    }

    /// Sleeps one tick. Returns true if a shutdown arrived first.
    async fn wait(&mut self, tick: Duration) -> bool {
        let shutdown = &mut self.shutdown;
        let stop = async {
            // a dropped sender can never ask us to stop
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(tick) => false,
            _ = stop => true,
        }
    }

    fn shutdown_requested(&self) -> bool { *self.shutdown.borrow() }

    fn interrupted(&self) -> Outcome {
        println!("\nInterrupted - stopping");
        self.log_session();
        Outcome::Interrupted { batches: self.stats.batches }
    }

    fn log_session(&self) {
        let s = &self.stats;
        println!("{s}");
        info!(batches = s.batches, files = s.files, reads = s.reads(), bases = s.bases, "session totals");
    }
}
