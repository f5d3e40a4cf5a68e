//! Media handling through ffmpeg/ffprobe.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{JimakuError, Result};

/// One subtitle file to embed, with its track metadata.
#[derive(Debug, Clone)]
pub struct SubtitleTrack {
    pub path: PathBuf,
    pub language: String,
    pub label: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Extract a clean mono speech track suitable for transcription.
    async fn extract_clean_audio(&self, video: &Path, audio: &Path) -> Result<()>;

    /// Media duration in seconds.
    async fn probe_duration(&self, media: &Path) -> Result<f64>;

    /// Embed subtitle tracks as soft subtitles without re-encoding streams.
    async fn mux_subtitles(
        &self,
        video: &Path,
        tracks: &[SubtitleTrack],
        output: &Path,
    ) -> Result<()>;
}

pub struct FfmpegProcessor {
    config: MediaConfig,
}

impl FfmpegProcessor {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Check that both ffmpeg and ffprobe respond.
    pub fn check_availability(&self) -> Result<()> {
        for binary in [&self.config.ffmpeg_path, &self.config.ffprobe_path] {
            let output = Command::new(binary)
                .arg("-version")
                .output()
                .map_err(|e| JimakuError::Media(format!("{} not found: {}", binary, e)))?;
            if !output.status.success() {
                return Err(JimakuError::Media(format!(
                    "{} version check failed",
                    binary
                )));
            }
        }
        debug!("ffmpeg and ffprobe are available");
        Ok(())
    }
}

/// Containers that require the mov_text subtitle codec.
fn needs_mov_text(output: &Path) -> bool {
    matches!(
        output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("mp4") | Some("m4v") | Some("mov")
    )
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn extract_clean_audio(&self, video: &Path, audio: &Path) -> Result<()> {
        info!(
            "Extracting audio from {} to {}",
            video.display(),
            audio.display()
        );

        // Mono 16 kHz float PCM with loudness normalization: quiet dialogue
        // otherwise falls under the transcriber's detection threshold.
        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-i").arg(video)
            .arg("-vn")
            .arg("-acodec").arg("pcm_f32le")
            .arg("-ar").arg("16000")
            .arg("-ac").arg("1")
            .arg("-af").arg("loudnorm=I=-16:TP=-1.5:LRA=11")
            .arg("-y")
            .arg(audio)
            .output()
            .map_err(|e| JimakuError::Media(format!("Failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JimakuError::Media(format!(
                "Audio extraction failed: {}",
                stderr
            )));
        }
        Ok(())
    }

    async fn probe_duration(&self, media: &Path) -> Result<f64> {
        let output = Command::new(&self.config.ffprobe_path)
            .arg("-v").arg("error")
            .arg("-show_entries").arg("format=duration")
            .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
            .arg(media)
            .output()
            .map_err(|e| JimakuError::Media(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JimakuError::Media(format!("Duration probe failed: {}", stderr)));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|e| JimakuError::Media(format!("Unparseable duration {:?}: {}", text, e)))
    }

    async fn mux_subtitles(
        &self,
        video: &Path,
        tracks: &[SubtitleTrack],
        output_path: &Path,
    ) -> Result<()> {
        if tracks.is_empty() {
            return Err(JimakuError::Media("no subtitle tracks to embed".to_string()));
        }
        info!(
            "Embedding {} subtitle track(s) into {} -> {}",
            tracks.len(),
            video.display(),
            output_path.display()
        );

        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.arg("-y").arg("-i").arg(video);
        for track in tracks {
            cmd.arg("-i").arg(&track.path);
        }

        cmd.arg("-map").arg("0");
        for (index, _) in tracks.iter().enumerate() {
            cmd.arg("-map").arg(format!("{}", index + 1));
        }

        // Copy audio/video streams untouched; only subtitles are encoded.
        cmd.arg("-c").arg("copy");
        let codec = if needs_mov_text(output_path) { "mov_text" } else { "srt" };
        cmd.arg("-c:s").arg(codec);

        for (index, track) in tracks.iter().enumerate() {
            cmd.arg(format!("-metadata:s:s:{}", index))
                .arg(format!("language={}", track.language));
            cmd.arg(format!("-metadata:s:s:{}", index))
                .arg(format!("title={}", track.label));
        }

        cmd.arg(output_path);
        debug!("Executing ffmpeg command: {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| JimakuError::Media(format!("Failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JimakuError::Media(format!(
                "Subtitle embedding failed: {}",
                stderr
            )));
        }
        Ok(())
    }
}
