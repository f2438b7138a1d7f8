// basecall-watch/src/invoke.rs

use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Command,
};
use tracing::{debug, info};

use crate::{error::ToolError, presets::RunConfiguration};

/// Runs the external basecaller over one staged batch.
///
/// Returns once the tool has exited. `Ok` means exit status 0; the output
/// directory is then expected to hold the tool's results.
#[async_trait]
pub trait Basecaller: Send + Sync {
    async fn basecall(&self, input: &Path, output: &Path, run: &RunConfiguration) -> Result<(), ToolError>;
}

#[derive(Clone, Debug)]
pub struct Guppy {
    pub executable: PathBuf,
    pub device: String,
    pub extra_args: Vec<String>,
}

impl Guppy {
    pub fn new(executable: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        Self { executable: executable.into(), device: device.into(), extra_args: vec![] }
    }

    pub fn command_args(&self, input: &Path, output: &Path, run: &RunConfiguration) -> Vec<String> {
        let mut argv = vec![
            "--input_path".to_string(), input.display().to_string(),
            "--save_path".to_string(), output.display().to_string(),
            "--device".to_string(), self.device.clone(),
        ];
        argv.extend(run.preset_args());
        argv.extend(self.extra_args.iter().cloned());
        argv
    }
}

#[async_trait]
impl Basecaller for Guppy {
    async fn basecall(&self, input: &Path, output: &Path, run: &RunConfiguration) -> Result<(), ToolError> {
        let argv = self.command_args(input, output, run);
        let mut console = tokio::io::stdout();
        run_streaming(&self.executable, &argv, &mut console).await
    }
}

/// Spawns `program`, copies its stdout and stderr into `sink` as the bytes
/// arrive, and waits for it to exit.
pub async fn run_streaming<W>(program: &Path, argv: &[String], sink: &mut W) -> Result<(), ToolError>
where
    W: AsyncWrite + Unpin + Send,
{
    let name = program.display().to_string();
    info!(program = %name, args = %argv.join(" "), "starting basecaller");
    let spawn_err = |source| ToolError::Spawn { program: name.clone(), source };

    let mut child = Command::new(program)
        .args(argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    // A console write error must not orphan the child, so pump failures are only logged.
    if let (Some(out), Some(err)) = (child.stdout.take(), child.stderr.take()) {
        if let Err(e) = pump(out, err, sink).await {
            debug!(error = %e, "lost basecaller console output");
        }
    }

    let status = child.wait().await.map_err(spawn_err)?;
    debug!(%status, "basecaller exited");
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ToolError::Failed { program: name, code }),
        None => Err(ToolError::Killed { program: name }),
    }
}

async fn pump<A, B, W>(mut out: A, mut err: B, sink: &mut W) -> std::io::Result<u64>
where
    A: AsyncRead + Unpin,
    B: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut obuf = [0u8; 4096];
    let mut ebuf = [0u8; 4096];
    let (mut out_open, mut err_open) = (true, true);
    let mut total = 0u64;
    while out_open || err_open {
        let chunk = tokio::select! {
            r = out.read(&mut obuf), if out_open => match r? {
                0 => { out_open = false; None }
                n => Some(&obuf[..n]),
            },
            r = err.read(&mut ebuf), if err_open => match r? {
                0 => { err_open = false; None }
                n => Some(&ebuf[..n]),
            },
        };
        if let Some(bytes) = chunk {
            sink.write_all(bytes).await?;
            sink.flush().await?;
            total += bytes.len() as u64;
        }
    }
    Ok(total)
}
