//! Per-utterance transcription session
//!
//! One streaming connection to the transcription service per utterance. The
//! session forwards the platform's compressed frames verbatim (no local
//! decoding), surfaces at most one transcript downstream, and then closes the
//! connection best-effort. Socket errors are recorded, never retried within
//! the same utterance.

use super::messages::{ClientEvent, ServerEvent};
use crate::config::TranscribeSettings;
use crate::platform::{ChannelId, SpeakerId};
use anyhow::{Context, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Bound on the best-effort close so teardown can never hang on a peer.
const CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// One transcript surfaced by a transcription session.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub channel_id: ChannelId,
    pub speaker_id: SpeakerId,
    pub text: String,
}

/// Spawns the session task for one utterance.
///
/// `audio` carries the utterance's compressed frames; the sender dropping
/// marks end-of-utterance. `cancel` forces the session closed (speaker
/// removal, shutdown).
pub fn spawn(
    settings: TranscribeSettings,
    channel_id: ChannelId,
    speaker_id: SpeakerId,
    audio: mpsc::Receiver<Vec<u8>>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(settings, channel_id, speaker_id, audio, transcripts, cancel))
}

async fn run(
    settings: TranscribeSettings,
    channel_id: ChannelId,
    speaker_id: SpeakerId,
    mut audio: mpsc::Receiver<Vec<u8>>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    cancel: CancellationToken,
) {
    let request = match build_request(&settings) {
        Ok(request) => request,
        Err(e) => {
            warn!(
                "speaker {}: failed to build transcription request: {:#}",
                speaker_id, e
            );
            return;
        }
    };

    // Connect while the capture stream is already producing. Chunks arriving
    // before the socket opens are dropped, not buffered: bounded loss in
    // exchange for freshness.
    let connect = connect_async(request);
    tokio::pin!(connect);
    let ws = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws, _response)) => break ws,
                Err(e) => {
                    warn!("speaker {}: transcription connect failed: {}", speaker_id, e);
                    return;
                }
            },
            chunk = audio.recv() => match chunk {
                Some(_) => warn!(
                    "speaker {}: dropping audio received before transcription socket opened",
                    speaker_id
                ),
                None => {
                    debug!(
                        "speaker {}: capture ended before transcription socket opened",
                        speaker_id
                    );
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        }
    };
    debug!("speaker {}: transcription socket open", speaker_id);

    let (mut sink, mut stream) = ws.split();
    let mut chunks_sent: u64 = 0;
    let mut audio_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("speaker {}: transcription session cancelled", speaker_id);
                close_socket(&mut sink, &speaker_id).await;
                return;
            }
            chunk = audio.recv(), if audio_open => match chunk {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Binary(frame)).await {
                        warn!("speaker {}: transcription send failed: {}", speaker_id, e);
                    } else {
                        chunks_sent += 1;
                    }
                }
                None => {
                    audio_open = false;
                    if chunks_sent == 0 {
                        close_socket(&mut sink, &speaker_id).await;
                        return;
                    }
                    // Chunks went out but no result yet: keep listening. If
                    // none ever arrives the service's idle timeout reaps the
                    // connection.
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::Results(result)) => {
                            if let Some(transcript) = result.transcript() {
                                info!(
                                    "speaker {}: transcript after {} chunks: {}",
                                    speaker_id, chunks_sent, transcript
                                );
                                let event = TranscriptEvent {
                                    channel_id: channel_id.clone(),
                                    speaker_id: speaker_id.clone(),
                                    text: transcript.to_string(),
                                };
                                if transcripts.send(event).await.is_err() {
                                    debug!(
                                        "speaker {}: transcript receiver gone",
                                        speaker_id
                                    );
                                }
                                // First transcript wins; later results for
                                // this utterance are not awaited.
                                close_socket(&mut sink, &speaker_id).await;
                                return;
                            }
                        }
                        Ok(ServerEvent::Metadata(metadata)) => {
                            debug!(
                                "speaker {}: transcription metadata (request {})",
                                speaker_id, metadata.request_id
                            );
                        }
                        Ok(ServerEvent::Warning(warning)) => {
                            warn!(
                                "speaker {}: transcription warning: {}",
                                speaker_id, warning.description
                            );
                        }
                        Ok(ServerEvent::Unknown) => {}
                        Err(e) => {
                            warn!(
                                "speaker {}: unparseable transcription message: {}",
                                speaker_id, e
                            );
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(
                        "speaker {}: transcription socket closed without transcript",
                        speaker_id
                    );
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("speaker {}: transcription socket error: {}", speaker_id, e);
                    return;
                }
            },
        }
    }
}

/// Builds the connection request: query parameters select the model and the
/// platform-native audio format, the credential travels in a header.
fn build_request(settings: &TranscribeSettings) -> Result<Request> {
    // A bare authority ("ws://host:port") needs an explicit "/" before the
    // query string, or the handshake request-line is malformed.
    let mut base = settings.url.clone();
    let after_scheme = base.find("://").map(|i| i + 3).unwrap_or(0);
    if !base[after_scheme..].contains('/') {
        base.push('/');
    }
    let url = format!(
        "{}?model={}&smart_format={}&encoding={}&sample_rate={}",
        base,
        settings.model,
        settings.smart_format,
        settings.encoding,
        settings.sample_rate
    );
    let mut request = url
        .into_client_request()
        .context("invalid transcription service URL")?;
    if !settings.api_key.is_empty() {
        let value = HeaderValue::from_str(&format!("Token {}", settings.api_key))
            .context("transcription credential is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

/// Best-effort close: announce end of stream, close the socket, swallow
/// errors, and give up after a bounded wait. Safe to reach from any exit
/// path exactly once.
async fn close_socket(sink: &mut WsSink, speaker_id: &str) {
    let close = async {
        if let Ok(text) = serde_json::to_string(&ClientEvent::CloseStream) {
            let _ = sink.send(Message::Text(text)).await;
        }
        let _ = sink.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
        debug!("speaker {}: transcription close timed out", speaker_id);
    }
}
