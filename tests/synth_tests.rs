// Integration tests for the command synthesis engine
//
// Small shell scripts stand in for the synthesis program: one emits a known
// f32 sample, one hangs so the timeout path can be exercised.

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use voice_coach::synth::CommandEngine;
use voice_coach::{SynthesisEngine, SynthesisRequest};

fn script(name: &str, body: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("{}-{}", name, std::process::id()));
    fs::write(&path, body)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn request(text: &str) -> SynthesisRequest {
    SynthesisRequest {
        text: text.to_string(),
        speaker: 0,
        speed: 1.0,
    }
}

#[tokio::test]
async fn test_command_engine_parses_f32_output() -> Result<()> {
    // Setup: script drains stdin, then emits 1.0f32 little-endian
    let path = script(
        "voice-coach-synth-ok",
        "#!/bin/sh\ncat > /dev/null\nprintf '\\000\\000\\200\\077'\n",
    )?;
    let engine = CommandEngine::new(path.to_string_lossy(), 22_050);

    let speech = engine.synthesize(&request("hello")).await;
    fs::remove_file(&path)?;

    let speech = speech?;
    assert_eq!(speech.samples, vec![1.0]);
    assert_eq!(speech.sample_rate, 22_050);
    Ok(())
}

#[tokio::test]
async fn test_hung_synthesis_program_is_timed_out() -> Result<()> {
    // Setup: script ignores stdin and never exits on its own
    let path = script("voice-coach-synth-hung", "#!/bin/sh\nexec sleep 30\n")?;
    let engine =
        CommandEngine::with_timeout(path.to_string_lossy(), 22_050, Duration::from_millis(200));

    let started = Instant::now();
    let result = engine.synthesize(&request("hello")).await;
    fs::remove_file(&path)?;

    // Verify: the call fails promptly instead of waiting out the process
    let err = result.expect_err("a hung program must not produce samples");
    assert!(err.to_string().contains("timed out"), "unexpected error: {err:#}");
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}
