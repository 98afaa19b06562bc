//! Lifecycle orchestrator
//!
//! Single event loop that owns the session registry and reacts to platform
//! membership events, transcript events, and shutdown signals. All registry
//! mutation happens here, so mutual exclusion is structural rather than
//! lock-based. Shutdown is best-effort: every collaborator-facing cleanup
//! call is wrapped and bounded so one failure cannot block the rest.

use crate::assistant::AssistantClient;
use crate::config::Config;
use crate::platform::{
    ChannelId, GroupId, PlatformEvent, SpeakerDescriptor, SpeakerId, VoicePlatform,
};
use crate::session::{capture, ChannelSession, SessionRegistry, SpeakerSession};
use crate::speak::{self, PlaybackContext, SpeakRequest, SPEAK_QUEUE_DEPTH};
use crate::synth::SynthesisEngine;
use crate::transcribe::TranscriptEvent;
use crate::trigger;
use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Depth of the transcript channel feeding the event loop.
const TRANSCRIPT_QUEUE_DEPTH: usize = 64;

/// Bound on each collaborator-facing teardown call.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    config: Config,
    platform: Arc<dyn VoicePlatform>,
    engine: Arc<dyn SynthesisEngine>,
    assistant: Arc<AssistantClient>,
    registry: SessionRegistry,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        platform: Arc<dyn VoicePlatform>,
        engine: Arc<dyn SynthesisEngine>,
        assistant: Arc<AssistantClient>,
    ) -> Self {
        Self {
            config,
            platform,
            engine,
            assistant,
            registry: SessionRegistry::new(),
        }
    }

    /// Runs until a shutdown signal arrives or the platform event stream
    /// ends, then tears everything down best-effort. The teardown runs on
    /// the error path too, before the error is surfaced to the caller.
    pub async fn run(&mut self) -> Result<()> {
        let events = self
            .platform
            .subscribe_events()
            .await
            .context("failed to subscribe to platform events")?;
        let result = self.event_loop(events).await;
        self.shutdown().await;
        result
    }

    async fn event_loop(&mut self, mut events: mpsc::Receiver<PlatformEvent>) -> Result<()> {
        let (transcript_tx, mut transcripts) = mpsc::channel(TRANSCRIPT_QUEUE_DEPTH);

        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &transcript_tx).await,
                    None => {
                        info!("platform event stream ended");
                        return Ok(());
                    }
                },
                transcript = transcripts.recv() => {
                    if let Some(transcript) = transcript {
                        self.handle_transcript(transcript);
                    }
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: PlatformEvent,
        transcript_tx: &mpsc::Sender<TranscriptEvent>,
    ) {
        match event {
            PlatformEvent::JoinRequested {
                group_id,
                channel_id,
            } => self.join_channel(group_id, channel_id).await,
            PlatformEvent::LeaveRequested { channel_id } => {
                if let Some(channel) = self.registry.remove_channel(&channel_id) {
                    info!("leaving channel {} on request", channel_id);
                    teardown_channel(channel).await;
                }
            }
            PlatformEvent::SpeakerJoined {
                channel_id,
                speaker_id,
                descriptor,
            }
            | PlatformEvent::SpeakerUpdated {
                channel_id,
                speaker_id,
                descriptor,
            } => self.upsert_speaker(channel_id, speaker_id, descriptor, transcript_tx),
            PlatformEvent::SpeakerLeft {
                channel_id,
                speaker_id,
            } => {
                if let Some(channel) = self.registry.remove_speaker(&channel_id, &speaker_id) {
                    info!(
                        "last speaker left channel {}; tearing down",
                        channel.channel_id
                    );
                    teardown_channel(channel).await;
                }
            }
        }
    }

    async fn join_channel(&mut self, group_id: GroupId, channel_id: ChannelId) {
        if self.registry.contains_channel(&channel_id) {
            debug!("already joined channel {}", channel_id);
            return;
        }

        let connection = match self.platform.join(&group_id, &channel_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("failed to join channel {}: {:#}", channel_id, e);
                return;
            }
        };

        let speaking = Arc::new(AtomicBool::new(false));
        let (playback_tx, playback_rx) = mpsc::channel(SPEAK_QUEUE_DEPTH);
        let playback_cancel = CancellationToken::new();
        tokio::spawn(speak::playback_worker(
            PlaybackContext {
                connection: connection.clone(),
                channel_id: channel_id.clone(),
                engine: self.engine.clone(),
                codec: self.config.codec.clone(),
                voice: self.config.speech.clone(),
                speaking: speaking.clone(),
            },
            playback_rx,
            playback_cancel.clone(),
        ));

        self.registry.insert_channel(ChannelSession::new(
            channel_id,
            group_id,
            connection,
            speaking,
            playback_tx,
            playback_cancel,
        ));
    }

    fn upsert_speaker(
        &mut self,
        channel_id: ChannelId,
        speaker_id: SpeakerId,
        descriptor: SpeakerDescriptor,
        transcript_tx: &mpsc::Sender<TranscriptEvent>,
    ) {
        if descriptor.bot {
            return;
        }
        let Some(channel) = self.registry.channel(&channel_id) else {
            debug!(
                "speaker {} seen in untracked channel {}",
                speaker_id, channel_id
            );
            return;
        };

        let cancel = CancellationToken::new();
        let ctx = capture::CaptureContext {
            connection: channel.connection.clone(),
            channel_id: channel_id.clone(),
            speaker_id: speaker_id.clone(),
            silence: self.config.capture.silence(),
            transcribe: self.config.transcribe.clone(),
            transcripts: transcript_tx.clone(),
            cancel: cancel.clone(),
        };

        let session_speaker = speaker_id.clone();
        let session_descriptor = descriptor.clone();
        let created = self.registry.get_or_create_speaker(
            &channel_id,
            &speaker_id,
            descriptor,
            move || {
                tokio::spawn(capture::run(ctx));
                SpeakerSession::new(session_speaker, session_descriptor, cancel)
            },
        );
        if created == Some(true) {
            info!("tracking new speaker in channel {}", channel_id);
        }
    }

    /// Transcript → trigger parse → assistant → text reply + speak queue.
    /// The assistant round-trip runs as its own task so slow replies never
    /// stall membership handling.
    fn handle_transcript(&mut self, event: TranscriptEvent) {
        let Some(query) = trigger::extract_query(&event.text) else {
            debug!(
                "speaker {}: transcript carried no trigger phrase",
                event.speaker_id
            );
            return;
        };
        let Some(channel) = self.registry.channel(&event.channel_id) else {
            debug!("transcript for untracked channel {}", event.channel_id);
            return;
        };
        info!("speaker {} asked: {}", event.speaker_id, query);

        let assistant = self.assistant.clone();
        let platform = self.platform.clone();
        let playback = channel.playback.clone();
        let channel_id = event.channel_id.clone();
        tokio::spawn(async move {
            let Some(reply) = assistant.query(&query).await else {
                return;
            };
            if let Err(e) = platform.send_message(&channel_id, &reply).await {
                warn!("failed to send text reply to channel {}: {}", channel_id, e);
            }
            if playback.send(SpeakRequest { text: reply }).await.is_err() {
                debug!("playback queue closed for channel {}", channel_id);
            }
        });
    }

    async fn shutdown(&mut self) {
        info!(
            "shutting down: closing {} channel(s)",
            self.registry.channel_count()
        );
        let connections = self.registry.close_all();
        for connection in connections {
            match tokio::time::timeout(TEARDOWN_TIMEOUT, connection.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("disconnect failed during shutdown: {:#}", e),
                Err(_) => warn!("disconnect timed out during shutdown"),
            }
        }
        if let Err(e) = self.engine.release().await {
            warn!("failed to release synthesis engine: {:#}", e);
        }
    }
}

async fn teardown_channel(channel: ChannelSession) {
    match tokio::time::timeout(TEARDOWN_TIMEOUT, channel.connection.disconnect()).await {
        Ok(Ok(())) => info!("disconnected from channel {}", channel.channel_id),
        Ok(Err(e)) => warn!(
            "failed to disconnect channel {}: {:#}",
            channel.channel_id, e
        ),
        Err(_) => warn!("disconnect timed out for channel {}", channel.channel_id),
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
