pub use crate::chunker::Chunk;
use crate::chunker::ScriptChunker;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    SynthesizingVoice,
    SynthesizingVideo,
    Completed,
    Failed,
}

/// Generation unit for one chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub chunk: Chunk,
    pub status: SegmentStatus,
    pub audio_url: Option<String>,
    pub job_id: Option<String>,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

impl Segment {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            status: SegmentStatus::Pending,
            audio_url: None,
            job_id: None,
            video_url: None,
            error: None,
        }
    }

    pub fn index(&self) -> usize {
        self.chunk.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    PartiallyCompleted,
    Failed,
}

/// All segments of one generation request.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub script: String,
    pub segments: Vec<Segment>,
    pub progress: f64,
    pub status: RunStatus,
}

impl PipelineRun {
    pub fn plan(script: &str, chunker: &ScriptChunker) -> Self {
        let segments = chunker.chunk(script).into_iter().map(Segment::new).collect();
        Self {
            script: script.to_string(),
            segments,
            progress: 0.0,
            status: RunStatus::InProgress,
        }
    }

    pub fn total(&self) -> usize {
        self.segments.len()
    }

    pub fn is_single_segment(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn all_segments_completed(&self) -> bool {
        !self.segments.is_empty()
            && self
                .segments
                .iter()
                .all(|s| s.status == SegmentStatus::Completed)
    }

    /// Clip URLs in chunk order; `None` while any segment lacks one.
    pub fn clip_urls(&self) -> Option<Vec<String>> {
        self.segments.iter().map(|s| s.video_url.clone()).collect()
    }

    pub fn failed_segment(&self) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.status == SegmentStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoPayload {
    /// A clip that is already hosted; nothing was downloaded or stitched.
    Remote(String),
    Bytes(Vec<u8>),
}

/// Final artifact of a run.
#[derive(Debug, Clone)]
pub struct StitchedVideo {
    pub payload: VideoPayload,
    pub content_type: String,
    pub clip_urls: Vec<String>,
    pub is_partial: bool,
    pub is_stitched: bool,
    pub segment_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl StitchedVideo {
    pub fn single(url: String) -> Self {
        Self {
            payload: VideoPayload::Remote(url.clone()),
            content_type: "video/mp4".to_string(),
            clip_urls: vec![url],
            is_partial: false,
            is_stitched: false,
            segment_count: 1,
            generated_at: Utc::now(),
        }
    }

    pub fn stitched(bytes: Vec<u8>, clip_urls: Vec<String>) -> Self {
        Self {
            payload: VideoPayload::Bytes(bytes),
            content_type: "video/mp4".to_string(),
            segment_count: clip_urls.len(),
            clip_urls,
            is_partial: false,
            is_stitched: true,
            generated_at: Utc::now(),
        }
    }

    /// Fallback when the clips could not be joined: first clip up front,
    /// every clip listed for individual download.
    pub fn partial(clip_urls: Vec<String>) -> Self {
        let first = clip_urls.first().cloned().unwrap_or_default();
        Self {
            payload: VideoPayload::Remote(first),
            content_type: "video/mp4".to_string(),
            segment_count: clip_urls.len(),
            clip_urls,
            is_partial: true,
            is_stitched: false,
            generated_at: Utc::now(),
        }
    }

    pub fn primary_url(&self) -> Option<&str> {
        match &self.payload {
            VideoPayload::Remote(url) => Some(url.as_str()),
            VideoPayload::Bytes(_) => None,
        }
    }

    pub fn all_video_urls(&self) -> &[String] {
        &self.clip_urls
    }
}
