//! Synthesis and playback pipeline
//!
//! Each joined channel owns one playback worker draining a queue of speak
//! requests, so replies for a channel play in order and never overlap. A
//! single request walks the full chain: synthesize, quantize, interleave to
//! stereo, transcode/encode externally, play, then release everything. The
//! channel's speaking flag is cleared on every exit path, success or failure.

use crate::audio::{codec, pcm, CodecConfig};
use crate::config::SpeechSettings;
use crate::platform::{ChannelId, VoiceConnection};
use crate::synth::{SynthesisEngine, SynthesisRequest};
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Depth of the per-channel speak queue.
pub const SPEAK_QUEUE_DEPTH: usize = 8;

/// One assistant reply to speak into a channel.
#[derive(Debug)]
pub struct SpeakRequest {
    pub text: String,
}

pub struct PlaybackContext {
    pub connection: Arc<dyn VoiceConnection>,
    pub channel_id: ChannelId,
    pub engine: Arc<dyn SynthesisEngine>,
    pub codec: CodecConfig,
    pub voice: SpeechSettings,
    pub speaking: Arc<AtomicBool>,
}

/// Drains the channel's speak queue, one playback operation at a time.
pub async fn playback_worker(
    ctx: PlaybackContext,
    mut requests: mpsc::Receiver<SpeakRequest>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        if let Err(e) = speak(&ctx, &request.text).await {
            warn!("channel {}: playback failed: {:#}", ctx.channel_id, e);
        }
        // Speaking indication is withdrawn on every path.
        if let Err(e) = ctx.connection.set_speaking(false).await {
            debug!(
                "channel {}: failed to clear speaking indication: {}",
                ctx.channel_id, e
            );
        }
    }
    debug!("playback worker stopped for channel {}", ctx.channel_id);
}

/// Runs one playback operation end to end. Any failure aborts the operation;
/// the guard guarantees the speaking flag clears regardless.
async fn speak(ctx: &PlaybackContext, text: &str) -> Result<()> {
    ctx.speaking.store(true, Ordering::SeqCst);
    let _guard = SpeakingGuard {
        flag: ctx.speaking.clone(),
    };
    if let Err(e) = ctx.connection.set_speaking(true).await {
        debug!(
            "channel {}: failed to raise speaking indication: {}",
            ctx.channel_id, e
        );
    }

    let speech = ctx
        .engine
        .synthesize(&SynthesisRequest {
            text: text.to_string(),
            speaker: ctx.voice.speaker,
            speed: ctx.voice.speed,
        })
        .await
        .context("synthesis failed")?;
    if speech.samples.is_empty() {
        bail!("synthesis produced no samples");
    }

    let mono = pcm::quantize(&speech.samples);
    let stereo = pcm::duplicate_to_stereo(&mono);
    let encoded = codec::transcode(pcm::to_le_bytes(&stereo), speech.sample_rate, &ctx.codec)
        .await
        .context("transcode pipeline failed")?;

    let mut playback = ctx
        .connection
        .play(encoded)
        .await
        .context("playback subscribe failed")?;
    playback
        .wait_until_idle()
        .await
        .context("playback failed")?;
    if let Err(e) = playback.stop().await {
        debug!("channel {}: playback stop failed: {}", ctx.channel_id, e);
    }

    info!(
        "channel {}: spoke {} samples at {} Hz",
        ctx.channel_id,
        speech.samples.len(),
        speech.sample_rate
    );
    Ok(())
}

/// Clears the channel's speaking flag when dropped, covering every exit path
/// out of a playback operation.
struct SpeakingGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
