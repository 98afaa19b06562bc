//! Transcription service wire messages

use serde::{Deserialize, Serialize};

/// Structured messages received from the transcription service. Unknown
/// message types are tolerated and ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    Results(ResultEvent),
    Metadata(MetadataEvent),
    Warning(WarningEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ResultEvent {
    pub channel: ResultChannel,
    #[serde(default)]
    pub is_final: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResultChannel {
    #[serde(default)]
    pub alternatives: Vec<ResultAlternative>,
}

#[derive(Debug, Deserialize)]
pub struct ResultAlternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

impl ResultEvent {
    /// The first alternative's transcript, if non-empty.
    pub fn transcript(&self) -> Option<&str> {
        self.channel
            .alternatives
            .first()
            .map(|alt| alt.transcript.trim())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct MetadataEvent {
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WarningEvent {
    #[serde(default)]
    pub description: String,
}

/// Messages sent to the transcription service (audio chunks go as raw binary
/// frames; control messages as tagged JSON).
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    CloseStream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_with_transcript() {
        let raw = r#"{"type":"Results","is_final":true,
            "channel":{"alternatives":[{"transcript":"coach help","confidence":0.97}]}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Results(result) => {
                assert_eq!(result.transcript(), Some("coach help"));
                assert!(result.is_final);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_empty_transcript_yields_none() {
        let raw = r#"{"type":"Results","channel":{"alternatives":[{"transcript":"  "}]}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Results(result) => assert_eq!(result.transcript(), None),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_type_tolerated() {
        let raw = r#"{"type":"UtteranceEnd","last_word_end":3.1}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_close_stream_serialization() {
        let text = serde_json::to_string(&ClientEvent::CloseStream).unwrap();
        assert_eq!(text, r#"{"type":"CloseStream"}"#);
    }
}
