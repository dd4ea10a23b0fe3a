use crate::error::{PipelineError, PipelineResult};
use crate::ffmpeg;
use crate::progress::ProgressRange;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Joins ordered clips into one video.
#[async_trait]
pub trait Stitcher: Send + Sync {
    /// Whether this environment can stitch at all. When false the pipeline
    /// returns the clips individually instead of calling [`Stitcher::stitch`].
    async fn is_supported(&self) -> bool;

    async fn stitch(&self, clip_urls: &[String], progress: &ProgressRange) -> PipelineResult<Vec<u8>>;
}

/// Downloads the clips into a scratch directory and joins them with the
/// ffmpeg concat demuxer using stream copy.
pub struct FfmpegStitcher {
    client: reqwest::Client,
    supported: OnceCell<bool>,
}

impl FfmpegStitcher {
    pub fn new() -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            supported: OnceCell::new(),
        }
    }

    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Stitcher for FfmpegStitcher {
    async fn is_supported(&self) -> bool {
        *self
            .supported
            .get_or_init(|| async {
                let found = ffmpeg::check_ffmpeg().await;
                if !found {
                    warn!("ffmpeg not found in PATH; clips cannot be stitched");
                }
                found
            })
            .await
    }

    async fn stitch(&self, clip_urls: &[String], progress: &ProgressRange) -> PipelineResult<Vec<u8>> {
        if clip_urls.is_empty() {
            return Err(PipelineError::StitchFailure("no clips to stitch".to_string()));
        }

        if clip_urls.len() == 1 {
            let bytes = self
                .fetch(&clip_urls[0])
                .await
                .map_err(|e| PipelineError::StitchFailure(format!("download clip 1: {e}")))?;
            progress.finish();
            return Ok(bytes);
        }

        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new()
            .prefix("lipsync-stitch-")
            .tempdir()
            .map_err(|e| PipelineError::StitchFailure(format!("scratch dir: {e}")))?;

        let downloads = progress.sub_range(0.0, 0.6);
        let total = clip_urls.len();
        let mut clips: Vec<PathBuf> = Vec::with_capacity(total);
        for (idx, url) in clip_urls.iter().enumerate() {
            info!("Downloading clip {}/{}", idx + 1, total);
            let bytes = self
                .fetch(url)
                .await
                .map_err(|e| PipelineError::StitchFailure(format!("download clip {}: {e}", idx + 1)))?;

            let path = scratch.path().join(format!("clip_{idx:03}.mp4"));
            fs::write(&path, &bytes)
                .await
                .map_err(|e| PipelineError::StitchFailure(format!("write {}: {e}", path.display())))?;
            clips.push(path);
            downloads.report_fraction((idx + 1) as f64 / total as f64);
        }

        let manifest = scratch.path().join("concat.txt");
        fs::write(&manifest, ffmpeg::concat_manifest(&clips))
            .await
            .map_err(|e| PipelineError::StitchFailure(format!("write manifest: {e}")))?;
        progress.report_fraction(0.65);

        let output = scratch.path().join("output.mp4");
        info!("Concatenating {} clips -> {}", total, output.display());
        let produced = ffmpeg::ffmpeg_concat_copy(&manifest, &output)
            .await
            .map_err(|e| PipelineError::StitchFailure(format!("{e:#}")))?;
        if !produced {
            return Err(PipelineError::StitchFailure("ffmpeg produced no output".to_string()));
        }
        progress.report_fraction(0.9);

        let data = fs::read(&output)
            .await
            .map_err(|e| PipelineError::StitchFailure(format!("read output: {e}")))?;
        if data.is_empty() {
            return Err(PipelineError::StitchFailure("ffmpeg produced an empty file".to_string()));
        }

        match ffmpeg::ffprobe_duration_seconds(&output).await {
            Ok(duration) => info!("Stitched {} clips ({:.2}s, {} bytes)", total, duration, data.len()),
            Err(_) => info!("Stitched {} clips ({} bytes)", total, data.len()),
        }

        progress.finish();
        Ok(data)
    }
}
