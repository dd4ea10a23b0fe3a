use crate::api::{DEFAULT_VIDEO_PROMPT, JobPoller, VideoSynthesizer};
use crate::error::{PipelineError, PipelineResult};
use crate::logi;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const KIE_BASE: &str = "https://api.kie.ai";
const LIPSYNC_MODEL: &str = "infinitalk/from-audio";

/// Kie.ai jobs API, driving the InfiniteTalk lip-sync model.
pub struct KieClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl KieClient {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: KIE_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub fn create_task_body(image_url: &str, audio_url: &str, prompt: &str) -> Value {
    let prompt = if prompt.trim().is_empty() {
        DEFAULT_VIDEO_PROMPT
    } else {
        prompt
    };
    json!({
        "model": LIPSYNC_MODEL,
        "input": {
            "image_url": image_url,
            "audio_url": audio_url,
            "prompt": prompt,
        },
    })
}

fn envelope_ok(root: &Value) -> bool {
    matches!(root.get("code").and_then(Value::as_i64), Some(0) | Some(200))
}

fn envelope_msg(root: &Value) -> String {
    root.get("msg")
        .and_then(Value::as_str)
        .unwrap_or("unexpected response")
        .to_string()
}

/// Pulls the task id out of a `createTask` response envelope.
pub fn parse_task_id(root: &Value) -> PipelineResult<String> {
    let task_id = root
        .get("data")
        .and_then(|d| d.get("taskId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty());

    match task_id {
        Some(id) if envelope_ok(root) => Ok(id.to_string()),
        _ => Err(PipelineError::collaborator("kie", envelope_msg(root))),
    }
}

/// Unwraps the `data` object of a `recordInfo` response envelope.
pub fn parse_record_info(root: Value) -> PipelineResult<Value> {
    if !envelope_ok(&root) {
        return Err(PipelineError::collaborator("kie", envelope_msg(&root)));
    }
    match root {
        Value::Object(mut map) => Ok(map.remove("data").unwrap_or_else(|| json!({}))),
        _ => Err(PipelineError::collaborator("kie", "status response is not an object")),
    }
}

#[async_trait]
impl JobPoller for KieClient {
    async fn poll(&self, job_id: &str) -> PipelineResult<Value> {
        let root: Value = self
            .client
            .get(format!("{}/api/v1/jobs/recordInfo", self.base_url))
            .query(&[("taskId", job_id)])
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .json()
            .await?;

        debug!(job_id, response = %root, "kie status");
        parse_record_info(root)
    }
}

#[async_trait]
impl VideoSynthesizer for KieClient {
    fn name(&self) -> &'static str {
        "kie"
    }

    async fn submit(&self, image_url: &str, audio_url: &str, prompt: &str) -> PipelineResult<String> {
        logi(format!("Starting lip-sync job: image={} audio={}", image_url, audio_url));

        let resp = self
            .client
            .post(format!("{}/api/v1/jobs/createTask", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&create_task_body(image_url, audio_url, prompt))
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        let root: Value = serde_json::from_str(&raw).map_err(|_| {
            let snippet = raw.chars().take(300).collect::<String>();
            PipelineError::collaborator("kie", format!("HTTP {}: {}", status.as_u16(), snippet))
        })?;

        parse_task_id(&root)
    }
}
