use crate::api::{DEFAULT_VIDEO_PROMPT, VoiceConfig};
use crate::chunker::{DEFAULT_CHARS_PER_SECOND, DEFAULT_MAX_DURATION_SECONDS, ScriptChunker};
use crate::poll::PollSettings;
use crate::registry::DEFAULT_RETENTION;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kie_api_key: String,
    #[serde(rename = "elevenlabs_api_key")]
    #[serde(default)]
    pub elevenlabs_key: String,
    #[serde(default)]
    pub eleven_voice_id: String,
    #[serde(default = "default_model_id")]
    pub eleven_model_id: String,
    #[serde(default = "default_stability")]
    pub voice_stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub voice_similarity_boost: f32,
    #[serde(default = "default_video_prompt")]
    pub video_prompt: String,
    #[serde(default = "default_chars_per_second")]
    pub chars_per_second: u32,
    #[serde(default = "default_max_chunk_seconds")]
    pub max_chunk_seconds: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_max_concurrent_segments")]
    pub max_concurrent_segments: usize,
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_model_id() -> String {
    "eleven_monolingual_v1".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

fn default_video_prompt() -> String {
    DEFAULT_VIDEO_PROMPT.to_string()
}

fn default_chars_per_second() -> u32 {
    DEFAULT_CHARS_PER_SECOND
}

fn default_max_chunk_seconds() -> u32 {
    DEFAULT_MAX_DURATION_SECONDS
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_max_concurrent_segments() -> usize {
    1
}

fn default_job_retention_secs() -> u64 {
    DEFAULT_RETENTION.as_secs()
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Config {
    /// `LIPSYNC_CONFIG` if set, otherwise `config.json` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os("LIPSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Config =
            serde_json::from_str(content).context("Failed to parse config JSON")?;
        config.apply_fallbacks(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.kie_api_key.is_empty() {
            self.kie_api_key = lookup("KIE_API_KEY").unwrap_or_default();
        }
        if self.elevenlabs_key.is_empty() {
            self.elevenlabs_key = lookup("ELEVENLABS_API_KEY").unwrap_or_default();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chars_per_second == 0 {
            anyhow::bail!("config.json: chars_per_second must be positive");
        }
        if self.max_chunk_seconds == 0 {
            anyhow::bail!("config.json: max_chunk_seconds must be positive");
        }
        if self.max_poll_attempts == 0 {
            anyhow::bail!("config.json: max_poll_attempts must be positive");
        }
        if self.max_concurrent_segments == 0 {
            anyhow::bail!("config.json: max_concurrent_segments must be positive");
        }
        Ok(())
    }

    /// Keys needed to run the full pipeline.
    pub fn require_keys(&self) -> Result<()> {
        if self.kie_api_key.is_empty() {
            anyhow::bail!("config.json: kie_api_key missing");
        }
        if self.elevenlabs_key.is_empty() {
            anyhow::bail!("config.json: elevenlabs_api_key missing");
        }
        if self.eleven_voice_id.is_empty() {
            anyhow::bail!("config.json: eleven_voice_id missing");
        }
        Ok(())
    }

    pub fn voice(&self) -> VoiceConfig {
        VoiceConfig {
            voice_id: self.eleven_voice_id.clone(),
            model_id: self.eleven_model_id.clone(),
            stability: self.voice_stability,
            similarity_boost: self.voice_similarity_boost,
        }
    }

    pub fn chunker(&self) -> ScriptChunker {
        ScriptChunker::new(self.chars_per_second, self.max_chunk_seconds)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}
