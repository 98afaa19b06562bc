use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use voice_coach::assistant::AssistantClient;
use voice_coach::orchestrator::Orchestrator;
use voice_coach::platform::PlatformFactory;
use voice_coach::synth::EngineFactory;
use voice_coach::Config;

#[derive(Parser, Debug)]
#[command(name = "voice-coach", about = "Voice channel coaching assistant")]
struct Cli {
    /// Configuration file base path (extension optional)
    #[arg(long, default_value = "config/voice-coach")]
    config: String,

    /// Override the utterance-ending silence threshold, in milliseconds
    #[arg(long)]
    silence_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(silence_ms) = cli.silence_ms {
        config.capture.silence_ms = silence_ms;
    }

    info!("voice-coach v{}", env!("CARGO_PKG_VERSION"));
    info!("platform backend: {}", config.platform.backend);
    info!("transcription endpoint: {}", config.transcribe.url);
    info!("assistant model: {}", config.assistant.model);

    let platform = PlatformFactory::create(&config.platform)?;
    let engine = EngineFactory::create(&config.speech)?;
    let assistant = Arc::new(AssistantClient::new(config.assistant.clone()));

    let mut orchestrator = Orchestrator::new(config, platform, engine, assistant);
    orchestrator.run().await?;

    info!("voice-coach stopped");
    Ok(())
}
