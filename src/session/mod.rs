//! Session tracking and per-speaker capture
//!
//! This module provides:
//! - The session state registry (channels, speakers, their teardown handles)
//! - The self-re-arming per-speaker utterance capture loop

pub mod capture;
pub mod registry;

pub use registry::{ChannelSession, SessionRegistry, SpeakerSession};
