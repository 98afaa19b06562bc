//! In-memory platform backend
//!
//! A loopback implementation of the platform traits for integration tests
//! and local development: utterances are scripted through a controller, and
//! everything the pipeline does (playback audio, text replies, speaking
//! transitions, disconnects) is recorded for inspection.

use super::{
    ChannelId, PlatformEvent, PlaybackHandle, SpeakerId, VoiceConnection, VoicePlatform,
};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

const EVENT_QUEUE_DEPTH: usize = 64;

/// Spacing between scripted audio frames, roughly one voice packet.
const FRAME_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct LoopbackState {
    /// Scripted utterances awaiting a capture stream, per speaker.
    pending_utterances: HashMap<SpeakerId, VecDeque<Vec<Vec<u8>>>>,
    captures_started: HashMap<SpeakerId, usize>,
    messages: Vec<(ChannelId, String)>,
    playbacks: Vec<Vec<u8>>,
    speaking_transitions: Vec<(ChannelId, bool)>,
    disconnected: HashSet<ChannelId>,
}

pub struct LoopbackPlatform {
    events: Mutex<Option<mpsc::Receiver<PlatformEvent>>>,
    state: Arc<Mutex<LoopbackState>>,
    notify: Arc<Notify>,
}

/// Test-side handle: pushes events and scripted audio in, reads recordings out.
#[derive(Clone)]
pub struct LoopbackController {
    events_tx: Arc<Mutex<Option<mpsc::Sender<PlatformEvent>>>>,
    state: Arc<Mutex<LoopbackState>>,
    notify: Arc<Notify>,
}

impl LoopbackPlatform {
    pub fn new() -> (Self, LoopbackController) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        let notify = Arc::new(Notify::new());

        let platform = Self {
            events: Mutex::new(Some(events_rx)),
            state: state.clone(),
            notify: notify.clone(),
        };
        let controller = LoopbackController {
            events_tx: Arc::new(Mutex::new(Some(events_tx))),
            state,
            notify,
        };
        (platform, controller)
    }
}

#[async_trait::async_trait]
impl VoicePlatform for LoopbackPlatform {
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<PlatformEvent>> {
        self.events
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("platform event stream already taken"))
    }

    async fn join(&self, _group_id: &str, channel_id: &str) -> Result<Arc<dyn VoiceConnection>> {
        self.state
            .lock()
            .await
            .disconnected
            .remove(channel_id);
        Ok(Arc::new(LoopbackConnection {
            channel_id: channel_id.to_string(),
            state: self.state.clone(),
            notify: self.notify.clone(),
        }))
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .messages
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct LoopbackConnection {
    channel_id: ChannelId,
    state: Arc<Mutex<LoopbackState>>,
    notify: Arc<Notify>,
}

#[async_trait::async_trait]
impl VoiceConnection for LoopbackConnection {
    async fn capture_speaker(
        &self,
        speaker_id: &str,
        _silence: Duration,
    ) -> Result<mpsc::Receiver<Vec<u8>>> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if state.disconnected.contains(&self.channel_id) {
                    bail!("connection to channel {} is closed", self.channel_id);
                }
                if let Some(frames) = state
                    .pending_utterances
                    .get_mut(speaker_id)
                    .and_then(|queue| queue.pop_front())
                {
                    *state
                        .captures_started
                        .entry(speaker_id.to_string())
                        .or_insert(0) += 1;
                    // Frames are paced like live speech; the sender dropping
                    // after the last frame stands in for the silence-based
                    // end condition.
                    let (tx, rx) = mpsc::channel(frames.len().max(1));
                    tokio::spawn(async move {
                        for frame in frames {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(FRAME_INTERVAL).await;
                        }
                    });
                    return Ok(rx);
                }
            }
            notified.await;
        }
    }

    async fn play(&self, audio: mpsc::Receiver<Vec<u8>>) -> Result<Box<dyn PlaybackHandle>> {
        Ok(Box::new(LoopbackPlayback {
            audio: Some(audio),
            state: self.state.clone(),
        }))
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.state
            .lock()
            .await
            .speaking_transitions
            .push((self.channel_id.clone(), speaking));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state
            .lock()
            .await
            .disconnected
            .insert(self.channel_id.clone());
        // Wake pending capture requests so they observe the closed connection.
        self.notify.notify_waiters();
        Ok(())
    }
}

struct LoopbackPlayback {
    audio: Option<mpsc::Receiver<Vec<u8>>>,
    state: Arc<Mutex<LoopbackState>>,
}

#[async_trait::async_trait]
impl PlaybackHandle for LoopbackPlayback {
    async fn wait_until_idle(&mut self) -> Result<()> {
        let Some(mut audio) = self.audio.take() else {
            return Ok(());
        };
        let mut collected = Vec::new();
        while let Some(chunk) = audio.recv().await {
            collected.extend_from_slice(&chunk);
        }
        self.state.lock().await.playbacks.push(collected);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.audio = None;
        Ok(())
    }
}

impl LoopbackController {
    pub async fn send_event(&self, event: PlatformEvent) -> Result<()> {
        let sender = self
            .events_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("platform event stream closed"))?;
        sender
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("platform event stream closed"))
    }

    /// Ends the event stream, standing in for the gateway going away.
    pub async fn close_events(&self) {
        self.events_tx.lock().await.take();
    }

    /// Queues one utterance's frames for the speaker's next capture stream.
    pub async fn script_utterance(&self, speaker_id: &str, frames: Vec<Vec<u8>>) {
        self.state
            .lock()
            .await
            .pending_utterances
            .entry(speaker_id.to_string())
            .or_default()
            .push_back(frames);
        self.notify.notify_waiters();
    }

    pub async fn sent_messages(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().await.messages.clone()
    }

    /// One entry per completed playback operation, bytes concatenated.
    pub async fn playbacks(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.playbacks.clone()
    }

    pub async fn speaking_transitions(&self) -> Vec<(ChannelId, bool)> {
        self.state.lock().await.speaking_transitions.clone()
    }

    pub async fn captures_started(&self, speaker_id: &str) -> usize {
        self.state
            .lock()
            .await
            .captures_started
            .get(speaker_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn is_disconnected(&self, channel_id: &str) -> bool {
        self.state.lock().await.disconnected.contains(channel_id)
    }
}
