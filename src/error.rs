use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Validation(String),

    /// `index` is 0-based; the message names the segment 1-based.
    #[error("segment {} of {total} failed: {source}", .index + 1)]
    SegmentSynthesis {
        index: usize,
        total: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("remote job {job_id} failed: {message}")]
    RemoteJobFailed { job_id: String, message: String },

    #[error("remote job {job_id} did not finish within {attempts} poll attempts")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("remote job {job_id} completed without a result url")]
    MissingResult { job_id: String },

    #[error("stitching failed: {0}")]
    StitchFailure(String),

    #[error("{service} error: {message}")]
    Collaborator {
        service: &'static str,
        message: String,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    pub fn collaborator(service: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service,
            message: message.into(),
        }
    }

    pub fn segment(index: usize, total: usize, source: PipelineError) -> Self {
        Self::SegmentSynthesis {
            index,
            total,
            source: Box::new(source),
        }
    }

    /// Chunk index of the failed segment, if this error is tied to one.
    ///
    /// The index is 0-based: the second chunk failing yields `Some(1)`, while
    /// the display text calls it "segment 2 of N".
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            Self::SegmentSynthesis { index, .. } => Some(*index),
            _ => None,
        }
    }
}
