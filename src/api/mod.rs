//! Clients for the third-party services the pipeline drives, and the traits
//! the pipeline sees them through.

pub mod catbox;
pub mod elevenlabs;
pub mod kie;

use crate::error::PipelineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_VIDEO_PROMPT: &str = "A person speaking naturally";

#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl VoiceConfig {
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            ..Self::default()
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            model_id: "eleven_monolingual_v1".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> PipelineResult<AudioClip>;
}

/// Fetches the raw status payload of a remote job.
#[async_trait]
pub trait JobPoller: Send + Sync {
    async fn poll(&self, job_id: &str) -> PipelineResult<serde_json::Value>;
}

#[async_trait]
pub trait VideoSynthesizer: JobPoller {
    fn name(&self) -> &'static str;

    /// Starts a lip-sync job and returns its id.
    async fn submit(&self, image_url: &str, audio_url: &str, prompt: &str) -> PipelineResult<String>;
}

#[async_trait]
pub trait FileHost: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str, filename: &str) -> PipelineResult<String>;
}
