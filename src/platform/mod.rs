//! Voice platform boundary
//!
//! The voice-chat platform (gateway, channel membership, audio capture and
//! playback primitives) is an external collaborator. This module pins down
//! its interface as capability traits so the rest of the pipeline never
//! depends on a concrete platform SDK, and every connection/stream resource
//! exposes an idempotent teardown operation the cleanup paths can call
//! unconditionally.

pub mod loopback;

use crate::config::PlatformSettings;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type GroupId = String;
pub type ChannelId = String;
pub type SpeakerId = String;

/// Platform-owned view of a speaker. Not owned by the registry; updated in
/// place when the platform reports a change (e.g. mute state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerDescriptor {
    pub display_name: String,
    pub muted: bool,
    pub bot: bool,
}

/// Membership and command events delivered by the platform gateway.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    JoinRequested {
        group_id: GroupId,
        channel_id: ChannelId,
    },
    LeaveRequested {
        channel_id: ChannelId,
    },
    SpeakerJoined {
        channel_id: ChannelId,
        speaker_id: SpeakerId,
        descriptor: SpeakerDescriptor,
    },
    SpeakerUpdated {
        channel_id: ChannelId,
        speaker_id: SpeakerId,
        descriptor: SpeakerDescriptor,
    },
    SpeakerLeft {
        channel_id: ChannelId,
        speaker_id: SpeakerId,
    },
}

#[async_trait::async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Hands over the platform's event stream. May only be taken once.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<PlatformEvent>>;

    /// Joins a voice channel, returning a connection handle.
    async fn join(&self, group_id: &str, channel_id: &str) -> Result<Arc<dyn VoiceConnection>>;

    /// Sends a text message to the channel's text surface.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Opens a capture stream for one speaker. The stream carries the
    /// platform's native compressed audio frames and ends after `silence` of
    /// continuous non-speech.
    async fn capture_speaker(
        &self,
        speaker_id: &str,
        silence: Duration,
    ) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Subscribes a playback sink to this connection and begins playing the
    /// encoded audio stream.
    async fn play(&self, audio: mpsc::Receiver<Vec<u8>>) -> Result<Box<dyn PlaybackHandle>>;

    /// Platform-level speaking indication for this connection.
    async fn set_speaking(&self, speaking: bool) -> Result<()>;

    /// Tears down the connection. Idempotent; double-disconnect is safe.
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait PlaybackHandle: Send {
    /// Resolves when playback drains naturally (playback-idle).
    async fn wait_until_idle(&mut self) -> Result<()>;

    /// Stops the player and releases its resources. Idempotent.
    async fn stop(&mut self) -> Result<()>;
}

/// Constructs a platform backend by name.
pub struct PlatformFactory;

impl PlatformFactory {
    pub fn create(settings: &PlatformSettings) -> Result<Arc<dyn VoicePlatform>> {
        match settings.backend.as_str() {
            "loopback" => {
                let (platform, _controller) = loopback::LoopbackPlatform::new();
                Ok(Arc::new(platform))
            }
            other => anyhow::bail!("unsupported voice platform backend: {}", other),
        }
    }
}
