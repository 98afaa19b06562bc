pub mod assistant;
pub mod audio;
pub mod config;
pub mod orchestrator;
pub mod platform;
pub mod session;
pub mod speak;
pub mod synth;
pub mod transcribe;
pub mod trigger;

pub use assistant::AssistantClient;
pub use audio::CodecConfig;
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use platform::{
    PlatformEvent, PlatformFactory, SpeakerDescriptor, VoiceConnection, VoicePlatform,
};
pub use session::{ChannelSession, SessionRegistry, SpeakerSession};
pub use synth::{EngineFactory, SynthesisEngine, SynthesisRequest, SynthesizedSpeech};
pub use transcribe::TranscriptEvent;
