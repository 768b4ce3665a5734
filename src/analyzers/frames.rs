//! Video frame and audio-track extraction via ffmpeg.

use crate::config::{VideoSamplingMode, VideoSettings};
use crate::error::{Result, VitenError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

const FFMPEG_HINT: &str = "Please install ffmpeg and ensure it's in your PATH.";

/// Probe a media file's duration in seconds using ffprobe.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn probe_duration(path: &Path) -> Result<Option<f64>> {
    let result = Command::new("ffprobe")
        .arg("-v").arg("error")
        .arg("-show_entries").arg("format=duration")
        .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VitenError::DependencyMissing {
                name: "ffprobe",
                install_hint: FFMPEG_HINT,
            });
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.trim().parse::<f64>().ok())
}

/// Extract sampled frames from a video as JPEG files in `out_dir`.
///
/// The sampling mode decides the frame rate; frame count is capped by the
/// configured count in every mode.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn extract_frames(
    path: &Path,
    settings: &VideoSettings,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let fps = match settings.sampling_mode {
        VideoSamplingMode::Fps => settings.fps.max(0.01),
        VideoSamplingMode::Interval => 1.0 / settings.interval_seconds.max(0.1),
        VideoSamplingMode::Total => {
            let duration = probe_duration(path).await?.unwrap_or(0.0);
            if duration > 0.0 {
                f64::from(settings.frame_count) / duration
            } else {
                0.1
            }
        }
    };

    let pattern = out_dir.join("frame_%03d.jpg");
    let result = Command::new("ffmpeg")
        .arg("-i").arg(path)
        .arg("-vf").arg(format!("fps={:.4}", fps))
        .arg("-frames:v").arg(settings.frame_count.to_string())
        .arg("-q:v").arg(settings.frame_quality.to_string())
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(&pattern)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VitenError::DependencyMissing {
                name: "ffmpeg",
                install_hint: FFMPEG_HINT,
            });
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VitenError::MediaProcessing(format!(
            "ffmpeg frame extraction failed: {}",
            stderr
        )));
    }

    let mut frames: Vec<PathBuf> = std::fs::read_dir(out_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("frame_"))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();

    debug!("Extracted {} frames", frames.len());
    Ok(frames)
}

/// Extract the audio track of a video as MP3.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn extract_audio_track(path: &Path, dest: &Path) -> Result<()> {
    let result = Command::new("ffmpeg")
        .arg("-i").arg(path)
        .arg("-vn")
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("4")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(VitenError::MediaProcessing(format!(
                "ffmpeg audio extraction failed: {}",
                stderr
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VitenError::DependencyMissing {
            name: "ffmpeg",
            install_hint: FFMPEG_HINT,
        }),
        Err(e) => Err(e.into()),
    }
}
