//! Per-video processing pipeline.
//!
//! For each video: extract clean audio, optionally isolate vocals,
//! transcribe, filter hallucinations, commit the source subtitle track,
//! hand the missing target languages to the isolated translation worker,
//! and finally mux every intact track back into the container. Each stage
//! commits its output before the next starts, so an interrupted run resumes
//! from whatever is already on disk.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{JimakuError, Result};
use crate::isolation::{self, JobStatus, TranslationJob, TranslationManifest};
use crate::media::{MediaProcessor, SubtitleTrack};
use crate::model::ModelManager;
use crate::providers::TranscriptionOutput;
use crate::quality::filter_hallucinations;
use crate::writer::{commit_subtitles, is_intact_subtitle};

/// Suffix of finished containers; such files are never treated as inputs.
const MULTILANG_SUFFIX: &str = "_multilang";

#[derive(Debug, Default)]
pub struct ProcessSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Pipeline {
    config: Config,
    media: Box<dyn MediaProcessor>,
    manager: ModelManager,
}

impl Pipeline {
    pub fn new(config: Config, media: Box<dyn MediaProcessor>, manager: ModelManager) -> Self {
        Self {
            config,
            media,
            manager,
        }
    }

    /// Processes a single video file or every video under a directory.
    pub async fn process_path(&mut self, path: &Path) -> Result<ProcessSummary> {
        let videos = collect_videos(&self.config, path)?;
        if videos.is_empty() {
            return Err(JimakuError::FileNotFound(format!(
                "no video files under {}",
                path.display()
            )));
        }
        info!("Found {} video(s) to process", videos.len());

        let mut summary = ProcessSummary::default();
        for video in videos {
            match self.process_video(&video).await {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.skipped += 1,
                Err(JimakuError::Interrupted) => {
                    self.manager.release_all().await;
                    return Err(JimakuError::Interrupted);
                }
                Err(e) => {
                    warn!("Failed to process {}: {}", video.display(), e);
                    summary.failed += 1;
                }
            }
        }

        self.manager.release_all().await;
        info!(
            "Run complete: {} processed, {} skipped, {} failed",
            summary.processed, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// Returns false when the video was already fully processed.
    pub async fn process_video(&mut self, video: &Path) -> Result<bool> {
        let output_video = multilang_output(video);
        if output_video.exists() {
            info!("Skipping {}: already processed", video.display());
            return Ok(false);
        }
        info!("Processing {}", video.display());

        let scratch = tempfile::tempdir()
            .map_err(|e| JimakuError::Media(format!("cannot create scratch dir: {}", e)))?;
        let audio = scratch.path().join("audio.wav");
        self.media.extract_clean_audio(video, &audio).await?;

        let duration = self.media.probe_duration(video).await.unwrap_or(0.0);
        if duration > 0.0 {
            info!("Media duration: {:.1}s", duration);
        }

        let speech_audio = if self.config.whisper.use_vocal_separation {
            self.separate_vocals(&audio, scratch.path()).await
        } else {
            audio.clone()
        };

        let transcription = self.transcribe_with_retry(&speech_audio).await?;
        let detected = transcription.language.clone();
        info!(
            "Detected language {} (p={:.2}), {} raw segment(s)",
            detected,
            transcription.language_probability,
            transcription.segments.len()
        );

        let segments = filter_hallucinations(transcription.segments, &self.config.hallucinations);
        if segments.is_empty() {
            return Err(JimakuError::Transcription(format!(
                "no usable speech found in {}",
                video.display()
            )));
        }

        let source_srt = subtitle_path(video, &detected);
        commit_subtitles(&source_srt, &segments)?;
        info!("Committed source subtitles to {}", source_srt.display());

        let jobs = self.missing_target_jobs(video, &detected);
        if !jobs.is_empty() {
            // The worker needs the device to itself.
            self.manager.release_all().await;
            self.run_translation(video, &source_srt, &detected, jobs, scratch.path())
                .await?;
        }

        let tracks = self.intact_tracks(video, &detected);
        if tracks.is_empty() {
            return Err(JimakuError::Integrity(format!(
                "no intact subtitle tracks for {}",
                video.display()
            )));
        }
        self.media
            .mux_subtitles(video, &tracks, &output_video)
            .await?;
        info!("Wrote {}", output_video.display());
        Ok(true)
    }

    /// Best-effort vocal isolation; the raw audio is kept on any failure.
    async fn separate_vocals(&mut self, audio: &Path, scratch: &Path) -> PathBuf {
        let separated = async {
            let separator = self.manager.separator().await?;
            separator.separate(audio, scratch).await
        }
        .await;

        match separated {
            Ok(vocals) => {
                info!("Using isolated vocal track");
                vocals
            }
            Err(e) => {
                warn!("Vocal separation unavailable ({}), using raw audio", e);
                audio.to_path_buf()
            }
        }
    }

    /// One retry at half the beam width when transcription exhausts memory.
    async fn transcribe_with_retry(&mut self, audio: &Path) -> Result<TranscriptionOutput> {
        let beam = self.manager.profile().beam_size;
        let language = self.config.whisper.language.clone();

        let transcriber = self.manager.transcriber().await?;
        match transcriber.transcribe(audio, language.as_deref(), beam).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_exhaustion() && beam > 1 => {
                let reduced = (beam / 2).max(1);
                warn!(
                    "Transcription exhausted memory at beam {}, retrying at {}",
                    beam, reduced
                );
                // Reload to start from a clean allocator state.
                self.manager.release_all().await;
                let transcriber = self.manager.transcriber().await?;
                transcriber
                    .transcribe(audio, language.as_deref(), reduced)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Configured target languages whose tracks are not yet on disk.
    fn missing_target_jobs(&self, video: &Path, detected: &str) -> Vec<TranslationJob> {
        self.config
            .languages
            .keys()
            .filter(|iso| iso.as_str() != detected)
            .filter_map(|iso| {
                let output = subtitle_path(video, iso);
                if is_intact_subtitle(&output) {
                    None
                } else {
                    Some(TranslationJob {
                        language: iso.clone(),
                        nllb_code: self.config.nllb_code(iso),
                        label: self.config.language_label(iso),
                        output,
                    })
                }
            })
            .collect()
    }

    async fn run_translation(
        &mut self,
        video: &Path,
        source_srt: &Path,
        detected: &str,
        jobs: Vec<TranslationJob>,
        scratch: &Path,
    ) -> Result<()> {
        info!(
            "Translating {} into {} language(s)",
            video.display(),
            jobs.len()
        );
        let manifest = TranslationManifest::new(
            source_srt.to_path_buf(),
            self.config.nllb_code(detected),
            scratch.join("translate"),
            jobs,
            self.config.clone(),
        );
        let report = isolation::run_isolated(&manifest).await?;

        for job in &report.jobs {
            match job.status {
                JobStatus::Done => info!("{}: translated", job.language),
                JobStatus::Skipped => info!("{}: already present", job.language),
                JobStatus::Failed => warn!(
                    "{}: failed ({})",
                    job.language,
                    job.error.as_deref().unwrap_or("partial output")
                ),
            }
        }
        if report.batch_failures > 0 {
            info!(
                "Memory pressure during translation: {} shrink(s), final batch size {}",
                report.batch_failures, report.final_batch_size
            );
        }
        Ok(())
    }

    /// Source track first, then every intact configured target.
    fn intact_tracks(&self, video: &Path, detected: &str) -> Vec<SubtitleTrack> {
        let mut tracks = Vec::new();
        let source = subtitle_path(video, detected);
        if is_intact_subtitle(&source) {
            tracks.push(SubtitleTrack {
                path: source,
                language: detected.to_string(),
                label: self.config.language_label(detected),
            });
        }
        for iso in self.config.languages.keys() {
            if iso == detected {
                continue;
            }
            let path = subtitle_path(video, iso);
            if is_intact_subtitle(&path) {
                tracks.push(SubtitleTrack {
                    path,
                    language: iso.clone(),
                    label: self.config.language_label(iso),
                });
            }
        }
        tracks
    }
}

/// Sibling subtitle path: `video.mkv` + `es` -> `video.es.srt`.
pub fn subtitle_path(video: &Path, language: &str) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    video.with_file_name(format!("{}.{}.srt", stem, language))
}

/// Output container path: `video.mkv` -> `video_multilang.mkv`.
pub fn multilang_output(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = video.extension().and_then(|e| e.to_str()).unwrap_or("mkv");
    video.with_file_name(format!("{}{}.{}", stem, MULTILANG_SUFFIX, ext))
}

fn is_finished_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(MULTILANG_SUFFIX))
}

/// Lists the videos to process, sorted for a stable order.
pub fn collect_videos(config: &Config, path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        if !config.is_video_file(path) {
            return Err(JimakuError::Media(format!(
                "{} is not a recognized video file",
                path.display()
            )));
        }
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(JimakuError::FileNotFound(path.display().to_string()));
    }

    let mut videos: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| config.is_video_file(p) && !is_finished_output(p))
        .collect();
    videos.sort();
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{Device, PerformanceProfile, Precision, ProfileTier};
    use crate::media::MockMediaProcessor;
    use crate::model::{ModelBackend, ModelKind};
    use crate::providers::{TimedSegment, TranscriptionProvider};
    use async_trait::async_trait;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    #[test]
    fn test_subtitle_and_output_paths() {
        let video = Path::new("/media/show/episode 1.mkv");
        assert_eq!(
            subtitle_path(video, "es"),
            Path::new("/media/show/episode 1.es.srt")
        );
        assert_eq!(
            multilang_output(video),
            Path::new("/media/show/episode 1_multilang.mkv")
        );
    }

    #[test]
    fn test_collect_videos_skips_finished_outputs() {
        let dir = TempDir::new().unwrap();
        dir.child("a.mkv").touch().unwrap();
        dir.child("b_multilang.mkv").touch().unwrap();
        dir.child("notes.txt").touch().unwrap();
        dir.child("nested/c.mp4").touch().unwrap();

        let videos = collect_videos(&Config::default(), dir.path()).unwrap();
        let names: Vec<String> = videos
            .iter()
            .map(|v| v.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mkv", "c.mp4"]);
    }

    #[test]
    fn test_collect_videos_rejects_non_video_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("document.txt");
        file.touch().unwrap();
        assert!(collect_videos(&Config::default(), file.path()).is_err());
    }

    struct FakeWhisper;

    #[async_trait]
    impl ModelBackend for FakeWhisper {
        async fn load(&mut self, _profile: &PerformanceProfile) -> Result<()> {
            Ok(())
        }
        async fn unload(&mut self) -> Result<()> {
            Ok(())
        }
        fn as_transcription(&mut self) -> Option<&mut dyn TranscriptionProvider> {
            Some(self)
        }
    }

    #[async_trait]
    impl TranscriptionProvider for FakeWhisper {
        async fn transcribe(
            &mut self,
            _audio: &Path,
            _language: Option<&str>,
            _beam_size: u32,
        ) -> Result<TranscriptionOutput> {
            Ok(TranscriptionOutput {
                language: "en".to_string(),
                language_probability: 0.99,
                duration: 4.0,
                segments: vec![
                    TimedSegment {
                        start: 0.0,
                        end: 1.0,
                        text: "Hello there.".to_string(),
                        no_speech_prob: 0.02,
                    },
                    TimedSegment {
                        start: 2.0,
                        end: 3.0,
                        text: "Thank you for watching!".to_string(),
                        no_speech_prob: 0.98,
                    },
                ],
            })
        }
    }

    fn profile() -> PerformanceProfile {
        PerformanceProfile {
            tier: ProfileTier::Low,
            device: Device::Cpu,
            max_batch_size: 4,
            precision: Precision::Int8,
            beam_size: 2,
            thread_count: 2,
        }
    }

    /// End-to-end over fakes: transcription only (no targets missing), with
    /// the hallucinated tail segment dropped before commit.
    #[tokio::test]
    async fn test_process_video_transcribes_and_muxes() {
        let dir = TempDir::new().unwrap();
        let video = dir.child("clip.mkv");
        video.touch().unwrap();

        let mut config = Config::default();
        config.whisper.use_vocal_separation = false;
        // Only the detected language is configured, so nothing to translate.
        config.languages.retain(|iso, _| iso == "en");
        config
            .hallucinations
            .known_phrases
            .push("Thank you for watching!".to_string());

        let mut media = MockMediaProcessor::new();
        media
            .expect_extract_clean_audio()
            .times(1)
            .returning(|_, _| Ok(()));
        media.expect_probe_duration().returning(|_| Ok(4.0));
        media
            .expect_mux_subtitles()
            .withf(|_, tracks, output| {
                tracks.len() == 1
                    && tracks[0].language == "en"
                    && output.to_string_lossy().contains("_multilang")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut manager = ModelManager::new(profile());
        manager.register(ModelKind::Transcription, Box::new(FakeWhisper));

        let mut pipeline = Pipeline::new(config, Box::new(media), manager);
        let processed = pipeline.process_video(video.path()).await.unwrap();
        assert!(processed);

        let srt = std::fs::read_to_string(subtitle_path(video.path(), "en")).unwrap();
        assert!(srt.contains("Hello there."));
        assert!(!srt.contains("Thank you for watching!"));
    }

    struct OomOnceWhisper {
        beams: std::sync::Arc<std::sync::Mutex<Vec<u32>>>,
        loads: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        failed_once: bool,
    }

    #[async_trait]
    impl ModelBackend for OomOnceWhisper {
        async fn load(&mut self, _profile: &PerformanceProfile) -> Result<()> {
            self.loads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
        async fn unload(&mut self) -> Result<()> {
            Ok(())
        }
        fn as_transcription(&mut self) -> Option<&mut dyn TranscriptionProvider> {
            Some(self)
        }
    }

    #[async_trait]
    impl TranscriptionProvider for OomOnceWhisper {
        async fn transcribe(
            &mut self,
            _audio: &Path,
            _language: Option<&str>,
            beam_size: u32,
        ) -> Result<TranscriptionOutput> {
            self.beams.lock().unwrap().push(beam_size);
            if !self.failed_once {
                self.failed_once = true;
                return Err(crate::error::JimakuError::MemoryExhaustion(
                    "decoder allocation failed".to_string(),
                ));
            }
            Ok(TranscriptionOutput {
                language: "en".to_string(),
                language_probability: 0.99,
                duration: 2.0,
                segments: vec![TimedSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "Narrow beam still works.".to_string(),
                    no_speech_prob: 0.02,
                }],
            })
        }
    }

    /// Exhaustion during transcription gets exactly one retry at half the
    /// beam width, on a freshly reloaded model.
    #[tokio::test]
    async fn test_process_video_retries_transcription_at_halved_beam() {
        let dir = TempDir::new().unwrap();
        let video = dir.child("clip.mkv");
        video.touch().unwrap();

        let mut config = Config::default();
        config.whisper.use_vocal_separation = false;
        config.languages.retain(|iso, _| iso == "en");

        let mut media = MockMediaProcessor::new();
        media
            .expect_extract_clean_audio()
            .returning(|_, _| Ok(()));
        media.expect_probe_duration().returning(|_| Ok(2.0));
        media
            .expect_mux_subtitles()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let beams = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let loads = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut manager = ModelManager::new(profile());
        manager.register(
            ModelKind::Transcription,
            Box::new(OomOnceWhisper {
                beams: beams.clone(),
                loads: loads.clone(),
                failed_once: false,
            }),
        );

        let mut pipeline = Pipeline::new(config, Box::new(media), manager);
        let processed = pipeline.process_video(video.path()).await.unwrap();
        assert!(processed);

        // Profile beam 2, retried at 1; the retry ran on a reloaded model.
        assert_eq!(*beams.lock().unwrap(), vec![2, 1]);
        assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 2);

        let srt = std::fs::read_to_string(subtitle_path(video.path(), "en")).unwrap();
        assert!(srt.contains("Narrow beam still works."));
    }

    #[tokio::test]
    async fn test_process_video_skips_when_output_exists() {
        let dir = TempDir::new().unwrap();
        let video = dir.child("clip.mkv");
        video.touch().unwrap();
        dir.child("clip_multilang.mkv").touch().unwrap();

        let media = MockMediaProcessor::new();
        let manager = ModelManager::new(profile());
        let mut pipeline = Pipeline::new(Config::default(), Box::new(media), manager);

        let processed = pipeline.process_video(video.path()).await.unwrap();
        assert!(!processed);
    }
}
