use crate::api::catbox::CatboxClient;
use crate::api::elevenlabs::ElevenLabsClient;
use crate::api::kie::KieClient;
use crate::api::{DEFAULT_VIDEO_PROMPT, FileHost, JobPoller, VideoSynthesizer, VoiceConfig, VoiceSynthesizer};
use crate::chunker::ScriptChunker;
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::init;
use crate::poll::{JobProgress, PollSettings, ResultExtractor, poll_until_terminal};
use crate::progress::{ProgressRange, ProgressReporter};
use crate::registry::{JobRegistry, JobRoute};
use crate::segment::{PipelineRun, RunStatus, Segment, SegmentStatus, StitchedVideo, VideoPayload};
use crate::stitcher::{FfmpegStitcher, Stitcher};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

// Share of overall progress given to segment synthesis; stitching gets the rest.
const SYNTHESIS_SHARE: f64 = 60.0;
// Within one segment's slot: voice + upload, then remote video progress.
const VOICE_SHARE: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll: PollSettings,
    pub max_concurrent_segments: usize,
    pub video_prompt: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            max_concurrent_segments: 1,
            video_prompt: DEFAULT_VIDEO_PROMPT.to_string(),
        }
    }
}

/// Script -> chunks -> (voice -> lip-sync clip) per chunk -> one video.
pub struct SegmentPipeline {
    chunker: ScriptChunker,
    voice: Arc<dyn VoiceSynthesizer>,
    video: Arc<dyn VideoSynthesizer>,
    host: Arc<dyn FileHost>,
    stitcher: Arc<dyn Stitcher>,
    extractor: ResultExtractor,
    registry: JobRegistry,
    settings: PipelineSettings,
}

impl SegmentPipeline {
    pub fn new(
        chunker: ScriptChunker,
        voice: Arc<dyn VoiceSynthesizer>,
        video: Arc<dyn VideoSynthesizer>,
        host: Arc<dyn FileHost>,
        stitcher: Arc<dyn Stitcher>,
    ) -> Self {
        Self {
            chunker,
            voice,
            video,
            host,
            stitcher,
            extractor: ResultExtractor::default(),
            registry: JobRegistry::default(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let voice = Arc::new(ElevenLabsClient::new(client.clone(), &cfg.elevenlabs_key));
        let video = Arc::new(KieClient::new(client.clone(), &cfg.kie_api_key));
        let host = Arc::new(CatboxClient::new(client));
        let stitcher = Arc::new(FfmpegStitcher::new()?);

        let settings = PipelineSettings {
            poll: cfg.poll_settings(),
            max_concurrent_segments: cfg.max_concurrent_segments,
            video_prompt: cfg.video_prompt.clone(),
        };

        Ok(Self::new(cfg.chunker(), voice, video, host, stitcher)
            .with_settings(settings)
            .with_registry(JobRegistry::new(cfg.job_retention())))
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_extractor(mut self, extractor: ResultExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn chunker(&self) -> &ScriptChunker {
        &self.chunker
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub async fn run(
        &self,
        script: &str,
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressReporter,
    ) -> PipelineResult<StitchedVideo> {
        let mut run = PipelineRun::plan(script, &self.chunker);
        self.execute(&mut run, voice, scene_url, progress).await
    }

    /// Drives a planned run. `run` keeps per-segment state for the caller
    /// to inspect afterwards, whichever way this returns.
    pub async fn execute(
        &self,
        run: &mut PipelineRun,
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressReporter,
    ) -> PipelineResult<StitchedVideo> {
        let result = match validate(run, voice, scene_url) {
            Ok(()) if run.is_single_segment() => self.run_single(run, voice, scene_url, progress).await,
            Ok(()) => self.run_multi(run, voice, scene_url, progress).await,
            Err(err) => Err(err),
        };

        run.status = match &result {
            Ok(video) if video.is_partial => RunStatus::PartiallyCompleted,
            Ok(_) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        };
        if result.is_ok() {
            progress.report(100.0);
        }
        run.progress = progress.current();
        result
    }

    /// Routes a status check for a job submitted by this pipeline.
    pub async fn check_job(&self, job_id: &str) -> PipelineResult<JobProgress> {
        let route = self
            .registry
            .lookup(job_id)
            .ok_or_else(|| PipelineError::Validation(format!("unknown job id: {job_id}")))?;
        if route.provider != self.video.name() {
            return Err(PipelineError::Validation(format!(
                "job {job_id} belongs to {}",
                route.provider
            )));
        }

        let payload = self.video.poll(job_id).await?;
        Ok(JobProgress::inspect(&payload, &self.extractor))
    }

    // One chunk: no stitcher involved, the clip is the result.
    async fn run_single(
        &self,
        run: &mut PipelineRun,
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressReporter,
    ) -> PipelineResult<StitchedVideo> {
        let urls = self
            .synthesize_segments(run, voice, scene_url, &progress.range(0.0, 100.0))
            .await?;
        let url = urls
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Validation("no clip produced".to_string()))?;
        logok("Video generated");
        Ok(StitchedVideo::single(url))
    }

    async fn run_multi(
        &self,
        run: &mut PipelineRun,
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressReporter,
    ) -> PipelineResult<StitchedVideo> {
        let synthesis = progress.range(0.0, SYNTHESIS_SHARE);
        let clip_urls = self
            .synthesize_segments(run, voice, scene_url, &synthesis)
            .await?;
        synthesis.finish();
        run.progress = progress.current();

        let total = clip_urls.len();
        if !self.stitcher.is_supported().await {
            logw("Video stitching is not available here; segments are returned individually.");
            return Ok(StitchedVideo::partial(clip_urls));
        }

        logi(format!("Combining {} video segments...", total));
        let stitching = progress.range(SYNTHESIS_SHARE, 100.0);
        match self.stitcher.stitch(&clip_urls, &stitching).await {
            Ok(bytes) => {
                logok(format!("Combined {} segments ({} bytes)", total, bytes.len()));
                Ok(StitchedVideo::stitched(bytes, clip_urls))
            }
            Err(err) => {
                logw(format!(
                    "Failed to combine segments ({}); they can be downloaded individually.",
                    err
                ));
                Ok(StitchedVideo::partial(clip_urls))
            }
        }
    }

    /// Produces one clip URL per segment, in chunk order.
    async fn synthesize_segments(
        &self,
        run: &mut PipelineRun,
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressRange,
    ) -> PipelineResult<Vec<String>> {
        let total = run.total();
        let texts: Vec<String> = run.segments.iter().map(|s| s.chunk.text.clone()).collect();
        // Segments stay in the caller's run, so a dropped future leaves them inspectable.
        let state = Mutex::new(run);

        if self.settings.max_concurrent_segments <= 1 || total == 1 {
            self.synthesize_sequential(&texts, voice, scene_url, progress, &state)
                .await
        } else {
            self.synthesize_concurrent(&texts, voice, scene_url, progress, &state)
                .await
        }
    }

    async fn synthesize_sequential(
        &self,
        texts: &[String],
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressRange,
        state: &Mutex<&mut PipelineRun>,
    ) -> PipelineResult<Vec<String>> {
        let total = texts.len();
        let mut urls = Vec::with_capacity(total);
        for (index, text) in texts.iter().enumerate() {
            let url = self
                .synthesize_segment(index, total, text, voice, scene_url, progress, state)
                .await?;
            urls.push(url);
        }
        Ok(urls)
    }

    // Results land in index-addressed slots; completion order is irrelevant.
    async fn synthesize_concurrent(
        &self,
        texts: &[String],
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressRange,
        state: &Mutex<&mut PipelineRun>,
    ) -> PipelineResult<Vec<String>> {
        let total = texts.len();
        let limit = self.settings.max_concurrent_segments.min(total);
        let mut slots: Vec<Option<String>> = vec![None; total];

        let mut pending = stream::iter(texts.iter().enumerate())
            .map(move |(index, text)| async move {
                let result = self
                    .synthesize_segment(index, total, text, voice, scene_url, progress, state)
                    .await;
                (index, result)
            })
            .buffer_unordered(limit);

        // Returning early drops the stream, which stops polling the rest.
        while let Some((index, result)) = pending.next().await {
            slots[index] = Some(result?);
        }

        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PipelineError::Validation("segment results incomplete".to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn synthesize_segment(
        &self,
        index: usize,
        total: usize,
        text: &str,
        voice: &VoiceConfig,
        scene_url: &str,
        progress: &ProgressRange,
        state: &Mutex<&mut PipelineRun>,
    ) -> PipelineResult<String> {
        let slot = progress.sub_range(index as f64 / total as f64, (index + 1) as f64 / total as f64);
        match self
            .try_synthesize_segment(index, total, text, voice, scene_url, &slot, state)
            .await
        {
            Ok(url) => {
                slot.finish();
                update_segment(state, index, &slot, |s| {
                    s.video_url = Some(url.clone());
                    s.status = SegmentStatus::Completed;
                });
                logok(format!("Segment {}/{} ready: {}", index + 1, total, url));
                Ok(url)
            }
            Err(err) => {
                update_segment(state, index, &slot, |s| {
                    s.status = SegmentStatus::Failed;
                    s.error = Some(err.to_string());
                });
                logw(format!("Failed to generate segment {}/{}: {}", index + 1, total, err));
                Err(PipelineError::segment(index, total, err))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_synthesize_segment(
        &self,
        index: usize,
        total: usize,
        text: &str,
        voice: &VoiceConfig,
        scene_url: &str,
        slot: &ProgressRange,
        state: &Mutex<&mut PipelineRun>,
    ) -> PipelineResult<String> {
        update_segment(state, index, slot, |s| s.status = SegmentStatus::SynthesizingVoice);
        logi(format!("Generating voiceover segment {}/{}...", index + 1, total));
        let audio = self.voice.synthesize(text, voice).await?;

        let filename = format!("segment_{index:03}.{}", audio_extension(&audio.content_type));
        let audio_url = self
            .host
            .upload(audio.bytes, &audio.content_type, &filename)
            .await?;
        slot.report_fraction(VOICE_SHARE);

        update_segment(state, index, slot, |s| {
            s.audio_url = Some(audio_url.clone());
            s.status = SegmentStatus::SynthesizingVideo;
        });
        logi(format!("Generating video segment {}/{}...", index + 1, total));
        let job_id = self
            .video
            .submit(scene_url, &audio_url, &self.settings.video_prompt)
            .await?;

        self.registry.register(
            &job_id,
            JobRoute {
                provider: self.video.name(),
                segment_index: index,
                audio_url,
            },
        );
        update_segment(state, index, slot, |s| s.job_id = Some(job_id.clone()));

        let remote = slot.sub_range(VOICE_SHARE, 1.0);
        let result = poll_until_terminal(
            self.video.as_ref(),
            &job_id,
            &self.settings.poll,
            &self.extractor,
            |fraction| {
                remote.report_fraction(fraction);
                mirror_progress(state, &remote);
            },
        )
        .await;
        self.registry.mark_completed(&job_id);
        result
    }
}

fn validate(run: &PipelineRun, voice: &VoiceConfig, scene_url: &str) -> PipelineResult<()> {
    if run.segments.is_empty() {
        return Err(PipelineError::Validation("script is empty".to_string()));
    }
    if scene_url.trim().is_empty() {
        return Err(PipelineError::Validation("scene image URL is required".to_string()));
    }
    if voice.voice_id.trim().is_empty() {
        return Err(PipelineError::Validation("voice id is required".to_string()));
    }
    Ok(())
}

// Also mirrors the live progress value into the run.
fn update_segment(
    state: &Mutex<&mut PipelineRun>,
    index: usize,
    progress: &ProgressRange,
    apply: impl FnOnce(&mut Segment),
) {
    let mut run = state.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(segment) = run.segments.get_mut(index) {
        apply(segment);
    }
    run.progress = progress.current();
}

fn mirror_progress(state: &Mutex<&mut PipelineRun>, progress: &ProgressRange) {
    state.lock().unwrap_or_else(|e| e.into_inner()).progress = progress.current();
}

fn audio_extension(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/aac" => "m4a",
        _ => "mp3",
    }
}

fn strip_ext(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("video")
        .to_string()
}

fn progress_logger() -> ProgressReporter {
    let last_decile = AtomicU32::new(0);
    ProgressReporter::new(move |p| {
        let decile = (p / 10.0).floor() as u32;
        if decile > last_decile.swap(decile, Ordering::SeqCst) {
            logi(format!("Progress: {:.0}%", p));
        }
    })
}

async fn download_to(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let bytes = client
        .get(url)
        .timeout(Duration::from_secs(300))
        .send()
        .await
        .with_context(|| format!("Failed to download {url}"))?
        .error_for_status()
        .with_context(|| format!("Failed to download {url}"))?
        .bytes()
        .await
        .context("Download read failed")?;
    fs::write(dest, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(())
}

/// Runs the whole pipeline for a script file. Returns the process exit code:
/// 0 on success, 2 when only individual segments are available, 1 on failure.
pub async fn run_generation(script_path: &Path, scene_url: &str, output_name: Option<&str>) -> Result<i32> {
    let cfg = Config::load(Config::default_path()).await?;
    cfg.require_keys()?;

    let script = fs::read_to_string(script_path)
        .await
        .with_context(|| format!("Failed to read script: {}", script_path.display()))?;
    let name = output_name
        .map(str::to_string)
        .unwrap_or_else(|| strip_ext(script_path));
    let out_dir = PathBuf::from(&cfg.output_dir);
    init::ensure_dir(&out_dir).await?;

    let pipeline = SegmentPipeline::from_config(&cfg)?;
    let info = pipeline.chunker().info(&script);
    if info.total_chunks > 1 {
        logi(format!(
            "Script is long and will be split into {} segments (~{}s of speech).",
            info.total_chunks, info.total_estimated_duration
        ));
    }

    let mut run = PipelineRun::plan(&script, pipeline.chunker());
    let progress = progress_logger();
    let video = match pipeline.execute(&mut run, &cfg.voice(), scene_url, &progress).await {
        Ok(video) => video,
        Err(err) => {
            logw(format!("FAILED: {}", err));
            return Ok(1);
        }
    };

    write_output(&video, &out_dir, &name).await
}

/// Saves a finished run under `out_dir` and maps it to an exit code.
pub async fn write_output(video: &StitchedVideo, out_dir: &Path, name: &str) -> Result<i32> {
    let out_path = out_dir.join(format!("{name}.mp4"));
    let saved = match &video.payload {
        VideoPayload::Bytes(bytes) => {
            fs::write(&out_path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            true
        }
        VideoPayload::Remote(url) => {
            let client = reqwest::Client::new();
            match download_to(&client, url, &out_path).await {
                Ok(()) => true,
                Err(err) => {
                    logw(format!("{:#}", err));
                    logw(format!("Video is still available at {}", url));
                    false
                }
            }
        }
    };

    if video.is_partial {
        let list = out_dir.join(format!("{name}_segments.txt"));
        let mut body = video.clip_urls.join("\n");
        body.push('\n');
        fs::write(&list, body)
            .await
            .with_context(|| format!("Failed to write {}", list.display()))?;
        logw(format!(
            "Only individual segments are available ({} clips listed in {}).",
            video.segment_count,
            list.display()
        ));
        return Ok(2);
    }

    if !saved {
        logw(format!("FAILED: could not save {}", out_path.display()));
        return Ok(1);
    }

    logok(format!("Wrote output: {}", out_path.display()));
    Ok(0)
}

pub async fn run_list_voices() -> Result<i32> {
    let cfg = Config::load(Config::default_path()).await?;
    if cfg.elevenlabs_key.is_empty() {
        anyhow::bail!("config.json: elevenlabs_api_key missing");
    }
    let client = ElevenLabsClient::new(reqwest::Client::new(), &cfg.elevenlabs_key);
    let voices = client.list_voices().await?;
    for voice in &voices {
        println!("{}\t{}", voice.voice_id, voice.name);
    }
    logi(format!("{} voices available", voices.len()));
    Ok(0)
}

// No config file means default pacing; a broken one is still an error.
async fn load_chunker(path: &Path) -> Result<ScriptChunker> {
    if !path.exists() {
        logi(format!("{} not found; using default pacing", path.display()));
        return Ok(ScriptChunker::default());
    }
    Ok(Config::load(path).await?.chunker())
}

/// Prints the chunk plan for a script without calling any service.
pub async fn run_chunk_plan(script_path: &Path) -> Result<i32> {
    let chunker = load_chunker(&Config::default_path()).await?;
    let script = fs::read_to_string(script_path)
        .await
        .with_context(|| format!("Failed to read script: {}", script_path.display()))?;

    let info = chunker.info(&script);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extension_follows_content_type() {
        assert_eq!(audio_extension("audio/mpeg"), "mp3");
        assert_eq!(audio_extension("audio/wav; charset=binary"), "wav");
        assert_eq!(audio_extension("application/octet-stream"), "mp3");
    }

    #[test]
    fn output_name_defaults_to_script_stem() {
        assert_eq!(strip_ext(Path::new("scripts/intro.txt")), "intro");
    }

    #[test]
    fn validation_rejects_missing_inputs() {
        let chunker = ScriptChunker::default();
        let voice = VoiceConfig::new("voice-1");

        let empty = PipelineRun::plan("   ", &chunker);
        assert!(matches!(
            validate(&empty, &voice, "https://img/a.png"),
            Err(PipelineError::Validation(_))
        ));

        let run = PipelineRun::plan("Hello there.", &chunker);
        assert!(validate(&run, &voice, " ").is_err());
        assert!(validate(&run, &VoiceConfig::default(), "https://img/a.png").is_err());
        assert!(validate(&run, &voice, "https://img/a.png").is_ok());
    }

    const UNREACHABLE: &str = "http://127.0.0.1:9/clip.mp4";

    #[tokio::test]
    async fn failed_download_of_single_clip_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let video = StitchedVideo::single(UNREACHABLE.to_string());

        let code = write_output(&video, dir.path(), "intro").await.unwrap();
        assert_eq!(code, 1);
        assert!(!dir.path().join("intro.mp4").exists());
    }

    #[tokio::test]
    async fn stitched_bytes_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let video = StitchedVideo::stitched(b"mp4".to_vec(), vec!["a".into(), "b".into()]);

        let code = write_output(&video, dir.path(), "intro").await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read(dir.path().join("intro.mp4")).unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn partial_result_lists_clips_even_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let video = StitchedVideo::partial(vec![UNREACHABLE.to_string(), "https://cdn.test/b.mp4".to_string()]);

        let code = write_output(&video, dir.path(), "intro").await.unwrap();
        assert_eq!(code, 2);
        let listed = std::fs::read_to_string(dir.path().join("intro_segments.txt")).unwrap();
        assert_eq!(listed, format!("{UNREACHABLE}\nhttps://cdn.test/b.mp4\n"));
    }

    #[tokio::test]
    async fn missing_config_uses_default_pacing() {
        let dir = tempfile::tempdir().unwrap();
        let chunker = load_chunker(&dir.path().join("config.json")).await.unwrap();
        assert_eq!(chunker.max_chars_per_chunk(), ScriptChunker::default().max_chars_per_chunk());
    }

    #[tokio::test]
    async fn invalid_config_is_not_silently_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"chars_per_second": 0}"#).unwrap();
        let err = load_chunker(&path).await.unwrap_err();
        assert!(err.to_string().contains("chars_per_second"));

        std::fs::write(&path, r#"{"chars_per_second": 1, "max_chunk_seconds": 20}"#).unwrap();
        assert_eq!(load_chunker(&path).await.unwrap().max_chars_per_chunk(), 20);
    }
}
