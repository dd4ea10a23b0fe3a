use async_trait::async_trait;
use lipsync_shorts::api::{AudioClip, FileHost, JobPoller, VideoSynthesizer, VoiceConfig, VoiceSynthesizer};
use lipsync_shorts::chunker::ScriptChunker;
use lipsync_shorts::generator::{PipelineSettings, SegmentPipeline};
use lipsync_shorts::poll::{JobState, PollSettings};
use lipsync_shorts::progress::{ProgressRange, ProgressReporter};
use lipsync_shorts::segment::{PipelineRun, RunStatus, SegmentStatus, VideoPayload};
use lipsync_shorts::stitcher::Stitcher;
use lipsync_shorts::{PipelineError, PipelineResult};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCRIPT: &str = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
const SCENE: &str = "https://img.test/scene.png";

#[derive(Default)]
struct FakeVoice {
    fail_text: Option<&'static str>,
    texts: Mutex<Vec<String>>,
}

#[async_trait]
impl VoiceSynthesizer for FakeVoice {
    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> PipelineResult<AudioClip> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail_text == Some(text) {
            return Err(PipelineError::collaborator("elevenlabs", "quota exceeded"));
        }
        Ok(AudioClip {
            bytes: text.as_bytes().to_vec(),
            content_type: "audio/mpeg".to_string(),
        })
    }
}

struct FakeHost;

#[async_trait]
impl FileHost for FakeHost {
    async fn upload(&self, _bytes: Vec<u8>, _content_type: &str, filename: &str) -> PipelineResult<String> {
        Ok(format!("https://host.test/{filename}"))
    }
}

/// Job ids mirror the uploaded segment name: `segment_001.mp3` -> `job-001`.
#[derive(Default)]
struct FakeVideo {
    fail_segment: Option<usize>,
    // Later segments finish first when set.
    staggered: bool,
    polls: Mutex<HashMap<String, u32>>,
    submitted: Mutex<Vec<String>>,
}

impl FakeVideo {
    fn segment_of(job_id: &str) -> usize {
        job_id.trim_start_matches("job-").parse().unwrap()
    }
}

#[async_trait]
impl JobPoller for FakeVideo {
    async fn poll(&self, job_id: &str) -> PipelineResult<Value> {
        let segment = Self::segment_of(job_id);
        let count = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(job_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if self.staggered {
            tokio::time::sleep(Duration::from_millis(100 * (3 - segment as u64))).await;
        }

        if count == 1 {
            return Ok(json!({"state": "generating", "progress": 50}));
        }
        if self.fail_segment == Some(segment) {
            return Ok(json!({"state": "fail", "failMsg": "face not detected"}));
        }
        let result = json!({"resultUrls": [format!("https://cdn.test/clip_{segment:03}.mp4")]});
        Ok(json!({"state": "success", "resultJson": result.to_string()}))
    }
}

#[async_trait]
impl VideoSynthesizer for FakeVideo {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn submit(&self, _image_url: &str, audio_url: &str, _prompt: &str) -> PipelineResult<String> {
        let index = audio_url
            .trim_start_matches("https://host.test/segment_")
            .trim_end_matches(".mp3");
        let job_id = format!("job-{index}");
        self.submitted.lock().unwrap().push(job_id.clone());
        Ok(job_id)
    }
}

#[derive(Default)]
struct FakeStitcher {
    unsupported: bool,
    fail: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Stitcher for FakeStitcher {
    async fn is_supported(&self) -> bool {
        !self.unsupported
    }

    async fn stitch(&self, clip_urls: &[String], progress: &ProgressRange) -> PipelineResult<Vec<u8>> {
        self.calls.lock().unwrap().push(clip_urls.to_vec());
        if self.fail {
            return Err(PipelineError::StitchFailure("concat exited with 1".to_string()));
        }
        progress.finish();
        Ok(b"stitched".to_vec())
    }
}

struct Harness {
    voice: Arc<FakeVoice>,
    video: Arc<FakeVideo>,
    stitcher: Arc<FakeStitcher>,
    pipeline: SegmentPipeline,
}

fn harness(video: FakeVideo, stitcher: FakeStitcher, concurrency: usize) -> Harness {
    harness_with_voice(FakeVoice::default(), video, stitcher, concurrency)
}

fn harness_with_voice(
    voice: FakeVoice,
    video: FakeVideo,
    stitcher: FakeStitcher,
    concurrency: usize,
) -> Harness {
    let voice = Arc::new(voice);
    let video = Arc::new(video);
    let stitcher = Arc::new(stitcher);
    let pipeline = SegmentPipeline::new(
        ScriptChunker::new(1, 20),
        voice.clone(),
        video.clone(),
        Arc::new(FakeHost),
        stitcher.clone(),
    )
    .with_settings(PipelineSettings {
        poll: PollSettings {
            interval: Duration::ZERO,
            max_attempts: 5,
        },
        max_concurrent_segments: concurrency,
        video_prompt: "A person speaking naturally".to_string(),
    });
    Harness {
        voice,
        video,
        stitcher,
        pipeline,
    }
}

fn expected_clips() -> Vec<String> {
    (0..3).map(|i| format!("https://cdn.test/clip_{i:03}.mp4")).collect()
}

#[tokio::test]
async fn three_segments_are_stitched_in_order() {
    let h = harness(FakeVideo::default(), FakeStitcher::default(), 1);
    let video = h
        .pipeline
        .run(SCRIPT, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();

    assert!(video.is_stitched);
    assert!(!video.is_partial);
    assert_eq!(video.segment_count, 3);
    assert_eq!(video.payload, VideoPayload::Bytes(b"stitched".to_vec()));
    assert_eq!(video.clip_urls, expected_clips());
    assert_eq!(*h.stitcher.calls.lock().unwrap(), vec![expected_clips()]);
    assert_eq!(
        *h.voice.texts.lock().unwrap(),
        vec!["Alpha beta gamma.", "Delta epsilon zeta.", "Eta theta iota."]
    );
}

#[tokio::test]
async fn failed_segment_stops_the_run_before_later_segments() {
    let video = FakeVideo {
        fail_segment: Some(1),
        ..FakeVideo::default()
    };
    let h = harness(video, FakeStitcher::default(), 1);
    let mut run = PipelineRun::plan(SCRIPT, h.pipeline.chunker());

    let err = h
        .pipeline
        .execute(&mut run, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::SegmentSynthesis { index: 1, total: 3, .. }
    ));
    assert!(err.to_string().starts_with("segment 2 of 3 failed"));
    assert!(err.to_string().contains("face not detected"));

    assert_eq!(h.voice.texts.lock().unwrap().len(), 2);
    assert!(h.stitcher.calls.lock().unwrap().is_empty());
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.segments[0].status, SegmentStatus::Completed);
    assert_eq!(run.segments[1].status, SegmentStatus::Failed);
    assert_eq!(run.segments[2].status, SegmentStatus::Pending);
    assert_eq!(run.failed_segment().map(|s| s.index()), Some(1));
}

#[tokio::test]
async fn stitch_failure_degrades_to_individual_clips() {
    let stitcher = FakeStitcher {
        fail: true,
        ..FakeStitcher::default()
    };
    let h = harness(FakeVideo::default(), stitcher, 1);
    let mut run = PipelineRun::plan(SCRIPT, h.pipeline.chunker());

    let video = h
        .pipeline
        .execute(&mut run, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();

    assert!(video.is_partial);
    assert!(!video.is_stitched);
    assert_eq!(video.clip_urls, expected_clips());
    assert_eq!(video.primary_url(), Some("https://cdn.test/clip_000.mp4"));
    assert_eq!(run.status, RunStatus::PartiallyCompleted);
    assert!(run.all_segments_completed());
}

#[tokio::test]
async fn unsupported_stitcher_is_never_called() {
    let stitcher = FakeStitcher {
        unsupported: true,
        ..FakeStitcher::default()
    };
    let h = harness(FakeVideo::default(), stitcher, 1);
    let video = h
        .pipeline
        .run(SCRIPT, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();

    assert!(video.is_partial);
    assert_eq!(video.all_video_urls(), expected_clips().as_slice());
    assert!(h.stitcher.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn single_segment_skips_stitching() {
    let h = harness(FakeVideo::default(), FakeStitcher::default(), 1);
    let video = h
        .pipeline
        .run("Short line.", &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();

    assert_eq!(video.payload, VideoPayload::Remote("https://cdn.test/clip_000.mp4".to_string()));
    assert!(!video.is_stitched);
    assert!(!video.is_partial);
    assert_eq!(video.segment_count, 1);
    assert!(h.stitcher.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_segments_keep_chunk_order() {
    let video = FakeVideo {
        staggered: true,
        ..FakeVideo::default()
    };
    let h = harness(video, FakeStitcher::default(), 3);
    let video = h
        .pipeline
        .run(SCRIPT, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();

    assert_eq!(video.clip_urls, expected_clips());
    assert_eq!(*h.stitcher.calls.lock().unwrap(), vec![expected_clips()]);
}

#[tokio::test]
async fn progress_is_monotone_and_ends_at_100() {
    let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
    let sink = Arc::clone(&seen);
    let progress = ProgressReporter::new(move |p| sink.lock().unwrap().push(p));

    let h = harness(FakeVideo::default(), FakeStitcher::default(), 1);
    h.pipeline
        .run(SCRIPT, &VoiceConfig::new("voice-1"), SCENE, &progress)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert!(seen.contains(&60.0));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test]
async fn empty_script_is_rejected_before_any_call() {
    let h = harness(FakeVideo::default(), FakeStitcher::default(), 1);
    let err = h
        .pipeline
        .run("   \n ", &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(h.voice.texts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn submitted_jobs_can_be_checked_by_id() {
    let h = harness(FakeVideo::default(), FakeStitcher::default(), 1);
    h.pipeline
        .run(SCRIPT, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();

    let route = h.pipeline.registry().lookup("job-002").unwrap();
    assert_eq!(route.provider, "fake");
    assert_eq!(route.segment_index, 2);
    assert_eq!(route.audio_url, "https://host.test/segment_002.mp3");

    let status = h.pipeline.check_job("job-002").await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.video_url.as_deref(), Some("https://cdn.test/clip_002.mp4"));

    let err = h.pipeline.check_job("job-999").await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_failure_drops_segments_still_in_flight() {
    // Segment 3 finishes first, so it fails while 1 and 2 are still polling.
    let video = FakeVideo {
        fail_segment: Some(2),
        staggered: true,
        ..FakeVideo::default()
    };
    let h = harness(video, FakeStitcher::default(), 3);
    let mut run = PipelineRun::plan(SCRIPT, h.pipeline.chunker());

    let err = h
        .pipeline
        .execute(&mut run, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::SegmentSynthesis { index: 2, total: 3, .. }
    ));
    assert!(h.stitcher.calls.lock().unwrap().is_empty());
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.segments[2].status, SegmentStatus::Failed);
    assert_eq!(run.segments[0].status, SegmentStatus::SynthesizingVideo);
    assert_eq!(run.segments[1].status, SegmentStatus::SynthesizingVideo);
}

#[tokio::test]
async fn voice_failure_fails_the_segment_before_any_video_job() {
    let voice = FakeVoice {
        fail_text: Some("Delta epsilon zeta."),
        ..FakeVoice::default()
    };
    let h = harness_with_voice(voice, FakeVideo::default(), FakeStitcher::default(), 1);
    let mut run = PipelineRun::plan(SCRIPT, h.pipeline.chunker());

    let err = h
        .pipeline
        .execute(&mut run, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap_err();

    assert_eq!(err.segment_index(), Some(1));
    assert!(err.to_string().contains("quota exceeded"));
    assert_eq!(*h.video.submitted.lock().unwrap(), vec!["job-000"]);
    assert_eq!(run.segments[1].status, SegmentStatus::Failed);
    assert_eq!(run.segments[1].job_id, None);
    assert_eq!(run.segments[2].status, SegmentStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn abandoned_run_keeps_segment_state_and_progress() {
    let video = FakeVideo {
        staggered: true,
        ..FakeVideo::default()
    };
    let h = harness(video, FakeStitcher::default(), 1);
    let mut run = PipelineRun::plan(SCRIPT, h.pipeline.chunker());
    let progress = ProgressReporter::silent();

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        h.pipeline
            .execute(&mut run, &VoiceConfig::new("voice-1"), SCENE, &progress),
    )
    .await;
    assert!(outcome.is_err());

    assert_eq!(run.total(), 3);
    assert_eq!(run.segments[0].status, SegmentStatus::SynthesizingVideo);
    assert_eq!(run.segments[0].job_id.as_deref(), Some("job-000"));
    assert_eq!(run.segments[1].status, SegmentStatus::Pending);
    assert!(run.progress > 0.0);
    assert_eq!(run.progress, progress.current());
    assert_eq!(run.status, RunStatus::InProgress);
}

#[tokio::test]
async fn finished_run_records_final_progress() {
    let h = harness(FakeVideo::default(), FakeStitcher::default(), 1);
    let mut run = PipelineRun::plan(SCRIPT, h.pipeline.chunker());
    h.pipeline
        .execute(&mut run, &VoiceConfig::new("voice-1"), SCENE, &ProgressReporter::silent())
        .await
        .unwrap();
    assert_eq!(run.progress, 100.0);
    assert_eq!(run.status, RunStatus::Completed);
}
