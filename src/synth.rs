//! Speech synthesis boundary
//!
//! The synthesis engine is a single shared long-lived instance: built once at
//! startup, stateless per request, released exactly once during shutdown.

use crate::config::SpeechSettings;
use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// Maximum text input size for synthesis. Prevents resource exhaustion from
/// oversized requests.
const MAX_SYNTH_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for one synthesis invocation.
const SYNTH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub speaker: u32,
    pub speed: f32,
}

/// Single-channel floating-point amplitudes in [-1, 1] plus the rate the
/// engine reports for them.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[async_trait::async_trait]
pub trait SynthesisEngine: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedSpeech>;

    /// Called exactly once during process shutdown.
    async fn release(&self) -> Result<()>;
}

/// Synthesis engine backed by an external program: text on stdin,
/// little-endian f32 samples on stdout.
#[derive(Debug)]
pub struct CommandEngine {
    program: String,
    sample_rate: u32,
    timeout: Duration,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, sample_rate: u32) -> Self {
        Self::with_timeout(program, sample_rate, SYNTH_TIMEOUT)
    }

    pub fn with_timeout(program: impl Into<String>, sample_rate: u32, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            sample_rate,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl SynthesisEngine for CommandEngine {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedSpeech> {
        if request.text.len() > MAX_SYNTH_INPUT_BYTES {
            bail!(
                "synthesis text exceeds maximum size: {} bytes (limit: {} bytes)",
                request.text.len(),
                MAX_SYNTH_INPUT_BYTES
            );
        }

        let mut child = Command::new(&self.program)
            .arg("--speaker")
            .arg(request.speaker.to_string())
            .arg("--speed")
            .arg(request.speed.to_string())
            .arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A process that outlives the timeout must not linger.
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn synthesis program '{}'", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .context("synthesis program has no stdin")?;
        let text = request.text.clone();

        // Write on a separate task so a full stdout buffer cannot deadlock us.
        let write_task =
            tokio::spawn(async move { stdin.write_all(text.as_bytes()).await });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("synthesis timed out after {:?}", self.timeout))?
            .context("failed to wait for synthesis program")?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => bail!("failed to write synthesis input: {}", e),
            Err(e) => bail!("synthesis stdin task failed: {}", e),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("synthesis program failed: {}", stderr.trim());
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();

        Ok(SynthesizedSpeech {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    async fn release(&self) -> Result<()> {
        // Per-request processes hold no persistent resources.
        info!("synthesis engine released");
        Ok(())
    }
}

/// Constructs a synthesis engine backend by name.
pub struct EngineFactory;

impl EngineFactory {
    pub fn create(settings: &SpeechSettings) -> Result<Arc<dyn SynthesisEngine>> {
        match settings.engine.as_str() {
            "command" => Ok(Arc::new(CommandEngine::new(
                settings.program.clone(),
                settings.sample_rate,
            ))),
            other => bail!("unsupported synthesis engine: {}", other),
        }
    }
}
