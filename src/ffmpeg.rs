use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to launch {}", args[0]))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            return Err(anyhow::anyhow!("Command failed ({}): {:?}", output.status, args));
        }
        return Err(anyhow::anyhow!(
            "Command failed ({}): {:?}: {}",
            output.status,
            args,
            stderr.chars().take(800).collect::<String>()
        ));
    }

    Ok(())
}

pub async fn check_ffmpeg() -> bool {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

/// Concat-demuxer manifest, one `file '<path>'` line per clip in playback order.
pub fn concat_manifest(clips: &[PathBuf]) -> String {
    let mut out = String::new();
    for clip in clips {
        // The demuxer's quoting: close, escaped quote, reopen.
        let escaped = clip.display().to_string().replace('\'', r"'\''");
        out.push_str(&format!("file '{}'\n", escaped));
    }
    out
}

/// Joins the clips listed in `list_txt` by stream copy; nothing is re-encoded.
pub async fn ffmpeg_concat_copy(list_txt: &Path, out_mp4: &Path) -> Result<bool> {
    let args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ];
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}
