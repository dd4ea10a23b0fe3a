use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod api;
pub mod chunker;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod generator;
pub mod init;
pub mod poll;
pub mod progress;
pub mod registry;
pub mod segment;
pub mod stitcher;

pub use error::{PipelineError, PipelineResult};
pub use generator::SegmentPipeline;

/// Receives every user-facing status line (`[INFO] ...`, `[WARN] ...`).
pub type StatusHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static STATUS_HOOK: Lazy<Mutex<Option<StatusHook>>> = Lazy::new(|| Mutex::new(None));

pub fn set_log_hook(hook: Option<StatusHook>) {
    if let Ok(mut guard) = STATUS_HOOK.lock() {
        *guard = hook;
    }
}

#[derive(Clone, Copy)]
enum Tag {
    Info,
    Ok,
    Warn,
}

impl Tag {
    fn label(self) -> &'static str {
        match self {
            Tag::Info => "INFO",
            Tag::Ok => "OK",
            Tag::Warn => "WARN",
        }
    }
}

fn logv(tag: Tag, message: &str) {
    match tag {
        Tag::Warn => tracing::warn!(target: "lipsync_shorts::status", "{}", message),
        Tag::Info | Tag::Ok => tracing::info!(target: "lipsync_shorts::status", "{}", message),
    }

    if let Ok(guard) = STATUS_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag.label(), message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv(Tag::Info, message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv(Tag::Ok, message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv(Tag::Warn, message.as_ref());
}
