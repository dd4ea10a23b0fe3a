use crate::api::{AudioClip, VoiceConfig, VoiceSynthesizer};
use crate::error::{PipelineError, PipelineResult};
use crate::logw;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const ELEVENLABS_BASE: &str = "https://api.elevenlabs.io/v1";
pub const MAX_TTS_CHARS: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct VoicesRoot {
    voices: Vec<Voice>,
}

pub struct ElevenLabsClient {
    client: Client,
    api_key: String,
}

impl ElevenLabsClient {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    pub async fn list_voices(&self) -> PipelineResult<Vec<Voice>> {
        let resp = self
            .client
            .get(format!("{ELEVENLABS_BASE}/voices"))
            .header("xi-api-key", &self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = if status.as_u16() == 401 {
                "invalid API key".to_string()
            } else {
                format!("HTTP {}", status.as_u16())
            };
            return Err(PipelineError::collaborator("elevenlabs", message));
        }

        let root: VoicesRoot = resp.json().await?;
        Ok(root.voices)
    }
}

pub fn tts_request_body(text: &str, voice: &VoiceConfig) -> serde_json::Value {
    serde_json::json!({
        "text": text,
        "model_id": voice.model_id,
        "voice_settings": {
            "stability": voice.stability,
            "similarity_boost": voice.similarity_boost,
        },
    })
}

#[async_trait]
impl VoiceSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> PipelineResult<AudioClip> {
        if text.trim().is_empty() {
            return Err(PipelineError::Validation("voiceover text is empty".to_string()));
        }
        if text.chars().count() > MAX_TTS_CHARS {
            return Err(PipelineError::Validation(format!(
                "voiceover text exceeds {MAX_TTS_CHARS} characters"
            )));
        }
        if voice.voice_id.is_empty() {
            return Err(PipelineError::Validation("voice id is required".to_string()));
        }

        let url = format!(
            "{ELEVENLABS_BASE}/text-to-speech/{}?output_format=mp3_44100_128",
            voice.voice_id
        );

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("xi-api-key", &self.api_key)
            .json(&tts_request_body(text, voice))
            .timeout(Duration::from_secs(300))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            logw(format!("ElevenLabs TTS failed HTTP {}", status.as_u16()));
            let snippet = body.chars().take(300).collect::<String>();
            return Err(PipelineError::collaborator(
                "elevenlabs",
                format!("HTTP {}: {}", status.as_u16(), snippet),
            ));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(PipelineError::collaborator("elevenlabs", "empty audio response"));
        }

        Ok(AudioClip {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
