use crate::api::JobPoller;
use crate::error::{PipelineError, PipelineResult};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "success" | "done" | "finished" => Self::Completed,
            "failed" | "fail" | "failure" | "error" | "cancelled" | "canceled" => Self::Failed,
            _ => Self::Processing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub state: JobState,
    pub progress: Option<f64>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn from_payload(payload: &Value) -> Self {
        let raw_state = first_string(payload, &["state", "status"]).unwrap_or_default();
        let progress = ["progress", "percent"]
            .iter()
            .find_map(|key| payload.get(key).and_then(Value::as_f64));
        Self {
            state: JobState::normalize(&raw_state),
            progress,
            error: first_string(payload, &["failMsg", "error", "message"]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

/// A named way of pulling a result URL out of a completed job payload.
#[derive(Clone, Copy)]
pub struct ExtractionStrategy {
    pub name: &'static str,
    extract: fn(&Value) -> Option<String>,
}

impl ExtractionStrategy {
    pub const fn new(name: &'static str, extract: fn(&Value) -> Option<String>) -> Self {
        Self { name, extract }
    }
}

/// Ordered list of extraction strategies. The upstream schema is not stable,
/// so every strategy after the first is treated as a fallback and logged.
#[derive(Clone)]
pub struct ResultExtractor {
    strategies: Vec<ExtractionStrategy>,
}

impl Default for ResultExtractor {
    fn default() -> Self {
        Self::new(vec![
            ExtractionStrategy::new("result_json.resultUrls", |p| {
                first_of_list(&result_json(p)?, "resultUrls")
            }),
            ExtractionStrategy::new("resultUrls", |p| first_of_list(p, "resultUrls")),
            ExtractionStrategy::new("result_json.url", |p| {
                first_string(&result_json(p)?, &["video_url", "url", "output"])
            }),
            ExtractionStrategy::new("url_field", |p| {
                first_string(p, &["fileUrl", "videoUrl", "video_url", "url"])
            }),
            ExtractionStrategy::new("output_field", |p| {
                ["output", "result"].iter().find_map(|key| match p.get(key)? {
                    Value::String(url) => non_blank(url),
                    obj @ Value::Object(_) => first_string(obj, &["url", "video_url"]),
                    _ => None,
                })
            }),
        ])
    }
}

impl ResultExtractor {
    pub fn new(strategies: Vec<ExtractionStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name).collect()
    }

    pub fn extract(&self, payload: &Value) -> Option<String> {
        for (pos, strategy) in self.strategies.iter().enumerate() {
            if let Some(url) = (strategy.extract)(payload) {
                if pos > 0 {
                    warn!(strategy = strategy.name, "result url found by fallback strategy");
                }
                return Some(url);
            }
        }
        None
    }
}

/// Normalized view of one status check, as returned to callers outside the run.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub state: JobState,
    pub progress: f64,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

impl JobProgress {
    pub fn inspect(payload: &Value, extractor: &ResultExtractor) -> Self {
        let snapshot = JobSnapshot::from_payload(payload);
        match snapshot.state {
            JobState::Completed => Self {
                state: JobState::Completed,
                progress: 100.0,
                video_url: extractor.extract(payload),
                error: None,
            },
            JobState::Failed => Self {
                state: JobState::Failed,
                progress: 0.0,
                video_url: None,
                error: Some(
                    snapshot
                        .error
                        .unwrap_or_else(|| "video generation failed".to_string()),
                ),
            },
            JobState::Processing => Self {
                state: JobState::Processing,
                progress: snapshot.progress.unwrap_or(0.0).max(10.0),
                video_url: None,
                error: None,
            },
        }
    }
}

/// Polls `job_id` until it completes, fails, or the attempt budget runs out.
///
/// Errors from an individual poll are logged and retried; they still use up
/// an attempt. `on_progress` receives the remote progress as a `0.0..=1.0`
/// fraction whenever the payload carries one.
pub async fn poll_until_terminal<P>(
    poller: &P,
    job_id: &str,
    settings: &PollSettings,
    extractor: &ResultExtractor,
    mut on_progress: impl FnMut(f64),
) -> PipelineResult<String>
where
    P: JobPoller + ?Sized,
{
    for attempt in 1..=settings.max_attempts {
        match poller.poll(job_id).await {
            Ok(payload) => {
                let snapshot = JobSnapshot::from_payload(&payload);
                match snapshot.state {
                    JobState::Completed => {
                        return extractor.extract(&payload).ok_or_else(|| {
                            PipelineError::MissingResult {
                                job_id: job_id.to_string(),
                            }
                        });
                    }
                    JobState::Failed => {
                        return Err(PipelineError::RemoteJobFailed {
                            job_id: job_id.to_string(),
                            message: snapshot
                                .error
                                .unwrap_or_else(|| "video generation failed".to_string()),
                        });
                    }
                    JobState::Processing => {
                        if let Some(progress) = snapshot.progress {
                            on_progress(progress / 100.0);
                        }
                        debug!(job_id, attempt, "job still processing");
                    }
                }
            }
            Err(err) => {
                warn!(job_id, attempt, error = %err, "status check failed; will retry");
            }
        }

        if attempt < settings.max_attempts {
            tokio::time::sleep(settings.interval).await;
        }
    }

    Err(PipelineError::PollTimeout {
        job_id: job_id.to_string(),
        attempts: settings.max_attempts,
    })
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_str).and_then(non_blank))
}

fn first_of_list(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_array()?
        .iter()
        .find_map(|item| item.as_str().and_then(non_blank))
}

fn result_json(payload: &Value) -> Option<Value> {
    match payload.get("resultJson")? {
        Value::String(raw) => match serde_json::from_str(raw) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!(error = %err, "resultJson is not valid json");
                None
            }
        },
        obj @ Value::Object(_) => Some(obj.clone()),
        _ => None,
    }
}
