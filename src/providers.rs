//! External capability providers.
//!
//! The pipeline treats the inference models as opaque collaborators reached
//! through three narrow contracts. The concrete implementations here talk to
//! runner subprocesses (see `model::runner`); every native backend failure
//! that means "allocation could not be satisfied" is mapped to
//! `JimakuError::MemoryExhaustion` so the batch scheduler can react to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{SeparatorConfig, TranslateConfig, WhisperConfig};
use crate::error::{JimakuError, Result};
use crate::hardware::PerformanceProfile;
use crate::model::ModelBackend;
use crate::model::runner::{RunnerClient, RunnerRequest};
use crate::subtitle::Segment;

/// Timed segments plus language identification from one transcription call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    pub language: String,
    pub language_probability: f64,
    pub duration: f64,
    pub segments: Vec<TimedSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub no_speech_prob: f64,
}

impl TimedSegment {
    pub fn into_segment(self) -> Segment {
        Segment::new(self.start, self.end, self.text)
    }
}

#[async_trait]
pub trait TranscriptionProvider: Send {
    /// Transcribe an audio file. `beam_size` allows the caller to retry at a
    /// reduced width after a memory-exhaustion signal.
    async fn transcribe(
        &mut self,
        audio: &Path,
        language: Option<&str>,
        beam_size: u32,
    ) -> Result<TranscriptionOutput>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationProvider: Send {
    /// Translate a batch of segment texts between NLLB language codes.
    async fn translate_batch(
        &mut self,
        texts: &[String],
        source: &str,
        target: &str,
    ) -> Result<Vec<String>>;

    /// Aggressively drop caches after an exhaustion event. Best-effort.
    async fn reclaim(&mut self);
}

#[async_trait]
pub trait SeparationProvider: Send {
    /// Isolate the vocal track; returns the path of the vocals file.
    async fn separate(&mut self, audio: &Path, output_dir: &Path) -> Result<PathBuf>;
}

/// Whisper transcription hosted in a runner subprocess.
pub struct WhisperBackend {
    config: WhisperConfig,
    runner: Option<RunnerClient>,
}

impl WhisperBackend {
    pub fn new(config: WhisperConfig) -> Self {
        Self {
            config,
            runner: None,
        }
    }
}

#[async_trait]
impl ModelBackend for WhisperBackend {
    async fn load(&mut self, profile: &PerformanceProfile) -> Result<()> {
        let mut runner = RunnerClient::spawn(
            &self.config.runner_command,
            "whisper",
            JimakuError::Transcription,
        )
        .await?;
        runner
            .call(&RunnerRequest::Load {
                model: self.config.model_size.clone(),
                device: profile.device.to_string(),
                precision: profile.precision.to_string(),
                threads: profile.thread_count,
            })
            .await?;
        self.runner = Some(runner);
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        if let Some(runner) = self.runner.take() {
            runner.shutdown().await?;
        }
        Ok(())
    }

    fn as_transcription(&mut self) -> Option<&mut dyn TranscriptionProvider> {
        Some(self)
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperBackend {
    async fn transcribe(
        &mut self,
        audio: &Path,
        language: Option<&str>,
        beam_size: u32,
    ) -> Result<TranscriptionOutput> {
        let runner = self.runner.as_mut().ok_or_else(|| {
            JimakuError::ModelLoad("transcription model is not resident".to_string())
        })?;

        let payload = runner
            .call(&RunnerRequest::Transcribe {
                audio: audio.to_path_buf(),
                language: language.map(|s| s.to_string()),
                initial_prompt: self.config.initial_prompt.clone(),
                beam_size,
                vad_min_silence_ms: self.config.vad_min_silence_ms,
            })
            .await?;

        serde_json::from_value(payload)
            .map_err(|e| JimakuError::Transcription(format!("malformed runner payload: {}", e)))
    }
}

/// NLLB translation hosted in a runner subprocess.
pub struct NllbBackend {
    config: TranslateConfig,
    runner: Option<RunnerClient>,
}

impl NllbBackend {
    pub fn new(config: TranslateConfig) -> Self {
        Self {
            config,
            runner: None,
        }
    }
}

#[async_trait]
impl ModelBackend for NllbBackend {
    async fn load(&mut self, profile: &PerformanceProfile) -> Result<()> {
        let mut runner = RunnerClient::spawn(
            &self.config.runner_command,
            "nllb",
            JimakuError::Translation,
        )
        .await?;
        runner
            .call(&RunnerRequest::Load {
                model: self.config.model_id.clone(),
                device: profile.device.to_string(),
                precision: profile.precision.to_string(),
                threads: profile.thread_count,
            })
            .await?;
        self.runner = Some(runner);
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        if let Some(runner) = self.runner.take() {
            runner.shutdown().await?;
        }
        Ok(())
    }

    fn as_translation(&mut self) -> Option<&mut dyn TranslationProvider> {
        Some(self)
    }
}

#[async_trait]
impl TranslationProvider for NllbBackend {
    async fn translate_batch(
        &mut self,
        texts: &[String],
        source: &str,
        target: &str,
    ) -> Result<Vec<String>> {
        let runner = self.runner.as_mut().ok_or_else(|| {
            JimakuError::ModelLoad("translation model is not resident".to_string())
        })?;

        let payload = runner
            .call(&RunnerRequest::Translate {
                texts: texts.to_vec(),
                source: source.to_string(),
                target: target.to_string(),
                num_beams: self.config.num_beams,
                length_penalty: self.config.length_penalty,
                repetition_penalty: self.config.repetition_penalty,
                no_repeat_ngram_size: self.config.no_repeat_ngram_size,
            })
            .await?;

        let translations: Vec<String> = serde_json::from_value(payload)
            .map_err(|e| JimakuError::Translation(format!("malformed runner payload: {}", e)))?;

        if translations.len() != texts.len() {
            return Err(JimakuError::Translation(format!(
                "runner returned {} translations for {} inputs",
                translations.len(),
                texts.len()
            )));
        }
        Ok(translations)
    }

    async fn reclaim(&mut self) {
        if let Some(runner) = self.runner.as_mut() {
            if let Err(e) = runner.call(&RunnerRequest::Reclaim).await {
                debug!("Reclaim request failed (ignored): {}", e);
            }
        }
    }
}

/// Vocal separation hosted in a runner subprocess.
pub struct SeparatorBackend {
    config: SeparatorConfig,
    runner: Option<RunnerClient>,
}

impl SeparatorBackend {
    pub fn new(config: SeparatorConfig) -> Self {
        Self {
            config,
            runner: None,
        }
    }
}

#[async_trait]
impl ModelBackend for SeparatorBackend {
    async fn load(&mut self, profile: &PerformanceProfile) -> Result<()> {
        let mut runner = RunnerClient::spawn(
            &self.config.runner_command,
            "separator",
            JimakuError::Separation,
        )
        .await?;
        runner
            .call(&RunnerRequest::Load {
                model: self.config.model_id.clone(),
                device: profile.device.to_string(),
                precision: profile.precision.to_string(),
                threads: profile.thread_count,
            })
            .await?;
        self.runner = Some(runner);
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        if let Some(runner) = self.runner.take() {
            runner.shutdown().await?;
        }
        Ok(())
    }

    fn as_separation(&mut self) -> Option<&mut dyn SeparationProvider> {
        Some(self)
    }
}

#[async_trait]
impl SeparationProvider for SeparatorBackend {
    async fn separate(&mut self, audio: &Path, output_dir: &Path) -> Result<PathBuf> {
        let runner = self.runner.as_mut().ok_or_else(|| {
            JimakuError::ModelLoad("separation model is not resident".to_string())
        })?;

        let payload = runner
            .call(&RunnerRequest::Separate {
                audio: audio.to_path_buf(),
                output_dir: output_dir.to_path_buf(),
            })
            .await?;

        #[derive(Deserialize)]
        struct SeparatePayload {
            vocals: PathBuf,
        }

        let parsed: SeparatePayload = serde_json::from_value(payload)
            .map_err(|e| JimakuError::Separation(format!("malformed runner payload: {}", e)))?;
        Ok(parsed.vocals)
    }
}
