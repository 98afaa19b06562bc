//! Session state registry
//!
//! Tracks which voice channels are joined, which speakers are followed in
//! each, and the cancellation handles for their capture loops and in-flight
//! transcription sessions. The registry is owned exclusively by the
//! orchestrator's event loop, so every mutation is synchronous with respect
//! to its caller and needs no lock. Closing a speaker is a token
//! cancellation: the capture loop and any transcription session observe it
//! and release their own resources best-effort, so cancelling twice is a
//! no-op.

use crate::platform::{ChannelId, GroupId, SpeakerDescriptor, SpeakerId, VoiceConnection};
use crate::speak::SpeakRequest;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One tracked speaker: descriptor snapshot plus the token that tears down
/// its capture loop and active transcription session.
pub struct SpeakerSession {
    pub speaker_id: SpeakerId,
    pub descriptor: SpeakerDescriptor,
    cancel: CancellationToken,
}

impl SpeakerSession {
    pub fn new(
        speaker_id: SpeakerId,
        descriptor: SpeakerDescriptor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            speaker_id,
            descriptor,
            cancel,
        }
    }

    /// Best-effort close of the capture loop and any active transcription
    /// session. Idempotent; failures inside the cancelled tasks are logged
    /// there, never propagated here.
    fn close(&self) {
        self.cancel.cancel();
    }
}

/// One joined voice channel: its connection, its speakers, and the playback
/// lane that serializes spoken replies.
pub struct ChannelSession {
    pub channel_id: ChannelId,
    pub group_id: GroupId,
    pub connection: Arc<dyn VoiceConnection>,
    pub speakers: HashMap<SpeakerId, SpeakerSession>,
    /// Set while a synthesized reply is playing in this channel.
    pub speaking: Arc<AtomicBool>,
    /// Queue feeding the channel's playback worker; requests play in order.
    pub playback: mpsc::Sender<SpeakRequest>,
    playback_cancel: CancellationToken,
}

impl ChannelSession {
    pub fn new(
        channel_id: ChannelId,
        group_id: GroupId,
        connection: Arc<dyn VoiceConnection>,
        speaking: Arc<AtomicBool>,
        playback: mpsc::Sender<SpeakRequest>,
        playback_cancel: CancellationToken,
    ) -> Self {
        Self {
            channel_id,
            group_id,
            connection,
            speakers: HashMap::new(),
            speaking,
            playback,
            playback_cancel,
        }
    }

    fn close(&mut self) {
        for speaker in self.speakers.values() {
            speaker.close();
        }
        self.speakers.clear();
        self.playback_cancel.cancel();
    }
}

/// Registry of every active channel and speaker session.
#[derive(Default)]
pub struct SessionRegistry {
    channels: HashMap<ChannelId, ChannelSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_channel(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelSession> {
        self.channels.get(channel_id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn speaker_count(&self, channel_id: &str) -> usize {
        self.channels
            .get(channel_id)
            .map(|c| c.speakers.len())
            .unwrap_or(0)
    }

    pub fn insert_channel(&mut self, session: ChannelSession) {
        info!(
            "tracking voice channel {} (group {})",
            session.channel_id, session.group_id
        );
        self.channels.insert(session.channel_id.clone(), session);
    }

    /// Creates the speaker if absent (via `create`, which is where the caller
    /// arms the capture loop) or updates the descriptor in place. Returns
    /// whether the speaker was newly created, or `None` for an untracked
    /// channel.
    pub fn get_or_create_speaker(
        &mut self,
        channel_id: &str,
        speaker_id: &str,
        descriptor: SpeakerDescriptor,
        create: impl FnOnce() -> SpeakerSession,
    ) -> Option<bool> {
        let channel = self.channels.get_mut(channel_id)?;
        match channel.speakers.entry(speaker_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().descriptor = descriptor;
                Some(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(create());
                Some(true)
            }
        }
    }

    /// Removes a speaker, closing its sessions best-effort. If the channel
    /// empties it is removed too and returned so the caller can tear down
    /// the voice connection.
    pub fn remove_speaker(
        &mut self,
        channel_id: &str,
        speaker_id: &str,
    ) -> Option<ChannelSession> {
        let channel = self.channels.get_mut(channel_id)?;
        match channel.speakers.remove(speaker_id) {
            Some(speaker) => {
                speaker.close();
                info!("removed speaker {} from channel {}", speaker_id, channel_id);
            }
            None => {
                // A departure we never tracked (e.g. a bot) must not count
                // as emptying the channel.
                debug!(
                    "speaker {} not tracked in channel {}",
                    speaker_id, channel_id
                );
                return None;
            }
        }

        if channel.speakers.is_empty() {
            let mut session = self.channels.remove(channel_id)?;
            session.close();
            return Some(session);
        }
        None
    }

    /// Removes a whole channel (explicit leave), closing all its sessions.
    pub fn remove_channel(&mut self, channel_id: &str) -> Option<ChannelSession> {
        let mut session = self.channels.remove(channel_id)?;
        session.close();
        Some(session)
    }

    /// Shutdown only: closes every active session across every channel and
    /// clears the registry. Idempotent. Returns the connections so the
    /// caller can disconnect them.
    pub fn close_all(&mut self) -> Vec<Arc<dyn VoiceConnection>> {
        let mut connections = Vec::new();
        for (_, mut channel) in self.channels.drain() {
            channel.close();
            connections.push(channel.connection.clone());
        }
        connections
    }
}
