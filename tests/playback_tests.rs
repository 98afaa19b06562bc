// Integration tests for the synthesis/playback pipeline
//
// The playback worker is driven with a scripted synthesis engine and the
// loopback platform, with `cat` standing in for the transcode command so the
// played bytes can be compared against the quantized PCM exactly.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voice_coach::audio::pcm;
use voice_coach::config::SpeechSettings;
use voice_coach::platform::loopback::LoopbackPlatform;
use voice_coach::speak::{playback_worker, PlaybackContext, SpeakRequest};
use voice_coach::{CodecConfig, SynthesisEngine, SynthesisRequest, SynthesizedSpeech, VoicePlatform};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine returning fixed samples, failing the first `fail_first` requests.
struct ScriptedEngine {
    samples: Vec<f32>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(samples: Vec<f32>) -> Self {
        Self {
            samples,
            fail_first: 1,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl SynthesisEngine for ScriptedEngine {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<SynthesizedSpeech> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            bail!("scripted synthesis failure");
        }
        Ok(SynthesizedSpeech {
            samples: self.samples.clone(),
            sample_rate: 22_050,
        })
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// `cat` copies stdin to stdout, so "encoded" output equals the PCM input.
fn passthrough_codec() -> CodecConfig {
    CodecConfig {
        program: "cat".to_string(),
        args: Vec::new(),
        output_sample_rate: 48_000,
    }
}

#[tokio::test]
async fn test_playback_pipeline_produces_stereo_pcm() -> Result<()> {
    // Setup: loopback channel plus a worker with a fixed-output engine
    let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
    let (platform, controller) = LoopbackPlatform::new();
    let connection = platform.join("group-1", "chan-1").await?;
    let speaking = Arc::new(AtomicBool::new(false));

    let (tx, rx) = mpsc::channel(8);
    let worker = tokio::spawn(playback_worker(
        PlaybackContext {
            connection,
            channel_id: "chan-1".to_string(),
            engine: Arc::new(ScriptedEngine::new(samples.clone())),
            codec: passthrough_codec(),
            voice: SpeechSettings::default(),
            speaking: speaking.clone(),
        },
        rx,
        CancellationToken::new(),
    ));

    tx.send(SpeakRequest {
        text: "rush the left lane".to_string(),
    })
    .await?;
    drop(tx);
    tokio::time::timeout(TEST_TIMEOUT, worker).await??;

    // Verify: played bytes are the quantized samples, stereo, little-endian
    let expected = pcm::to_le_bytes(&pcm::duplicate_to_stereo(&pcm::quantize(&samples)));
    let playbacks = controller.playbacks().await;
    assert_eq!(playbacks.len(), 1);
    assert_eq!(playbacks[0], expected);

    // Verify: speaking indication was raised then withdrawn, flag cleared
    let transitions = controller.speaking_transitions().await;
    assert_eq!(
        transitions,
        vec![
            ("chan-1".to_string(), true),
            ("chan-1".to_string(), false)
        ]
    );
    assert!(!speaking.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_requests_play_in_order() -> Result<()> {
    let samples = vec![0.25f32, -0.25];
    let (platform, controller) = LoopbackPlatform::new();
    let connection = platform.join("group-1", "chan-1").await?;

    let (tx, rx) = mpsc::channel(8);
    let worker = tokio::spawn(playback_worker(
        PlaybackContext {
            connection,
            channel_id: "chan-1".to_string(),
            engine: Arc::new(ScriptedEngine::new(samples.clone())),
            codec: passthrough_codec(),
            voice: SpeechSettings::default(),
            speaking: Arc::new(AtomicBool::new(false)),
        },
        rx,
        CancellationToken::new(),
    ));

    for text in ["first reply", "second reply", "third reply"] {
        tx.send(SpeakRequest {
            text: text.to_string(),
        })
        .await?;
    }
    drop(tx);
    tokio::time::timeout(TEST_TIMEOUT, worker).await??;

    // Verify: one playback per request, never interleaved
    let expected = pcm::to_le_bytes(&pcm::duplicate_to_stereo(&pcm::quantize(&samples)));
    let playbacks = controller.playbacks().await;
    assert_eq!(playbacks.len(), 3);
    for playback in playbacks {
        assert_eq!(playback, expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_synthesis_failure_clears_flag_and_worker_continues() -> Result<()> {
    // Setup: the first request fails in synthesis, the second succeeds
    let samples = vec![0.5f32, 0.5];
    let (platform, controller) = LoopbackPlatform::new();
    let connection = platform.join("group-1", "chan-1").await?;
    let speaking = Arc::new(AtomicBool::new(false));

    let (tx, rx) = mpsc::channel(8);
    let worker = tokio::spawn(playback_worker(
        PlaybackContext {
            connection,
            channel_id: "chan-1".to_string(),
            engine: Arc::new(ScriptedEngine::failing_first(samples.clone())),
            codec: passthrough_codec(),
            voice: SpeechSettings::default(),
            speaking: speaking.clone(),
        },
        rx,
        CancellationToken::new(),
    ));

    tx.send(SpeakRequest {
        text: "this one fails".to_string(),
    })
    .await?;
    tx.send(SpeakRequest {
        text: "this one plays".to_string(),
    })
    .await?;
    drop(tx);
    tokio::time::timeout(TEST_TIMEOUT, worker).await??;

    // Verify: only the second request produced audio, flag ends cleared
    let playbacks = controller.playbacks().await;
    assert_eq!(playbacks.len(), 1);
    assert!(!speaking.load(Ordering::SeqCst));

    // The failed request must still withdraw its speaking indication
    let transitions = controller.speaking_transitions().await;
    assert_eq!(transitions.last(), Some(&("chan-1".to_string(), false)));
    Ok(())
}

#[tokio::test]
async fn test_cancellation_stops_worker() -> Result<()> {
    let (platform, controller) = LoopbackPlatform::new();
    let connection = platform.join("group-1", "chan-1").await?;

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(8);
    let worker = tokio::spawn(playback_worker(
        PlaybackContext {
            connection,
            channel_id: "chan-1".to_string(),
            engine: Arc::new(ScriptedEngine::new(vec![0.1f32])),
            codec: passthrough_codec(),
            voice: SpeechSettings::default(),
            speaking: Arc::new(AtomicBool::new(false)),
        },
        rx,
        cancel.clone(),
    ));

    cancel.cancel();
    tokio::time::timeout(TEST_TIMEOUT, worker).await??;

    // Verify: nothing was played; the queue sender is now dead
    assert!(controller.playbacks().await.is_empty());
    assert!(tx
        .send(SpeakRequest {
            text: "too late".to_string(),
        })
        .await
        .is_err());
    Ok(())
}
