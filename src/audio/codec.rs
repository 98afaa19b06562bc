//! External codec pipeline
//!
//! Resampling and re-encoding of synthesized PCM happens in an external
//! transcode process rather than in-process. The default command is ffmpeg
//! reading raw s16le stereo on stdin and writing 48 kHz Ogg/Opus on stdout,
//! but the program and argument template are configuration so deployments
//! (and tests) can substitute their own pipeline.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Encoded frames are streamed out in chunks of this size.
const READ_CHUNK_BYTES: usize = 4096;

/// Depth of the encoded-audio channel handed to the playback sink.
const ENCODED_QUEUE_DEPTH: usize = 32;

/// Configuration for the transcode command.
///
/// `{input_rate}` and `{output_rate}` in the argument template are replaced
/// per invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub program: String,
    pub args: Vec<String>,
    pub output_sample_rate: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: [
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "s16le",
                "-ar",
                "{input_rate}",
                "-ac",
                "2",
                "-i",
                "pipe:0",
                "-c:a",
                "libopus",
                "-ar",
                "{output_rate}",
                "-ac",
                "2",
                "-f",
                "ogg",
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            output_sample_rate: 48_000,
        }
    }
}

/// Runs the configured transcode command over `pcm` and returns a receiver of
/// encoded audio chunks.
///
/// The process's stdin is fed from its own task so a full stdout pipe cannot
/// deadlock the writer. The receiver ends when the process closes stdout; a
/// non-zero exit is logged, not propagated, since by then playback has
/// already consumed whatever was produced.
pub async fn transcode(
    pcm: Vec<u8>,
    input_rate: u32,
    config: &CodecConfig,
) -> Result<mpsc::Receiver<Vec<u8>>> {
    let args: Vec<String> = config
        .args
        .iter()
        .map(|arg| {
            arg.replace("{input_rate}", &input_rate.to_string())
                .replace("{output_rate}", &config.output_sample_rate.to_string())
        })
        .collect();

    debug!("spawning transcode command: {} {}", config.program, args.join(" "));

    let mut child = Command::new(&config.program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn transcode command '{}'", config.program))?;

    let mut stdin = child
        .stdin
        .take()
        .context("transcode command has no stdin")?;
    let mut stdout = child
        .stdout
        .take()
        .context("transcode command has no stdout")?;
    let mut stderr = child
        .stderr
        .take()
        .context("transcode command has no stderr")?;

    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&pcm).await {
            warn!("transcode stdin write failed: {}", e);
        }
        // Dropping stdin closes the pipe and signals end of input.
    });

    // Drain stderr separately so a chatty process cannot stall on a full pipe.
    tokio::spawn(async move {
        let mut output = String::new();
        let _ = stderr.read_to_string(&mut output).await;
        let output = output.trim();
        if !output.is_empty() {
            warn!("transcode command stderr: {}", output);
        }
    });

    let (tx, rx) = mpsc::channel(ENCODED_QUEUE_DEPTH);
    tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        // Playback side went away; let the process finish.
                        break;
                    }
                }
                Err(e) => {
                    warn!("transcode stdout read failed: {}", e);
                    break;
                }
            }
        }
        match child.wait().await {
            Ok(status) if !status.success() => {
                warn!("transcode command exited with {}", status);
            }
            Err(e) => warn!("failed to reap transcode command: {}", e),
            _ => {}
        }
    });

    Ok(rx)
}
