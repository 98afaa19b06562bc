//! Utterance capture loop
//!
//! Per-speaker cycle: request a capture stream bounded by trailing silence,
//! hand its frames to a fresh transcription session, and re-arm immediately
//! when the stream ends. The loop produces an unbounded sequence of
//! utterances and terminates only through its cancellation token (speaker
//! removal or shutdown).

use crate::config::TranscribeSettings;
use crate::platform::{ChannelId, SpeakerId, VoiceConnection};
use crate::transcribe::{session as transcription, TranscriptEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Depth of the per-utterance audio channel into the transcription session.
const UTTERANCE_QUEUE_DEPTH: usize = 64;

/// Backoff before re-requesting a capture stream after a platform error.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(250);

pub struct CaptureContext {
    pub connection: Arc<dyn VoiceConnection>,
    pub channel_id: ChannelId,
    pub speaker_id: SpeakerId,
    /// Continuous non-speech of this length ends the current utterance.
    pub silence: Duration,
    pub transcribe: TranscribeSettings,
    pub transcripts: mpsc::Sender<TranscriptEvent>,
    pub cancel: CancellationToken,
}

pub async fn run(ctx: CaptureContext) {
    debug!("capture loop started for speaker {}", ctx.speaker_id);

    loop {
        let mut frames = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = ctx.connection.capture_speaker(&ctx.speaker_id, ctx.silence) => {
                match result {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(
                            "speaker {}: capture stream request failed: {}",
                            ctx.speaker_id, e
                        );
                        // Platform errors are transient as far as this loop is
                        // concerned; only speaker removal ends it.
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => break,
                            _ = tokio::time::sleep(CAPTURE_RETRY_DELAY) => continue,
                        }
                    }
                }
            }
        };

        // Each utterance gets its own transcription session; the session
        // outlives the capture stream if it is still waiting on a result.
        let (audio_tx, audio_rx) = mpsc::channel(UTTERANCE_QUEUE_DEPTH);
        transcription::spawn(
            ctx.transcribe.clone(),
            ctx.channel_id.clone(),
            ctx.speaker_id.clone(),
            audio_rx,
            ctx.transcripts.clone(),
            ctx.cancel.child_token(),
        );

        let mut speaking = false;
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!(
                        "capture loop cancelled mid-utterance for speaker {}",
                        ctx.speaker_id
                    );
                    return;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if !speaking {
                            speaking = true;
                            debug!("speaker {} started talking", ctx.speaker_id);
                        }
                        if audio_tx.send(frame).await.is_err() {
                            // Session already finished; keep draining until
                            // silence ends the capture stream.
                        }
                    }
                    None => break,
                },
            }
        }
        if speaking {
            debug!("speaker {} stopped talking", ctx.speaker_id);
        }
        // Dropping the sender marks end-of-utterance; a fresh capture stream
        // is requested immediately.
        drop(audio_tx);
    }

    debug!("capture loop terminated for speaker {}", ctx.speaker_id);
}
