use crate::ffmpeg;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

pub async fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        crate::logi(format!("Created directory: {}", dir.display()));
    }
    Ok(())
}

/// Startup checks. Missing ffmpeg is not fatal: multi-segment runs then
/// return their clips individually.
pub async fn preflight() {
    if !ffmpeg::check_ffmpeg().await {
        crate::logw("FFmpeg not found in PATH. Multi-segment videos will not be combined.");
    }
}
