use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{JimakuError, Result};

fn default_silence_threshold() -> f64 {
    0.9
}

fn default_repetition_threshold() -> u32 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub whisper: WhisperConfig,
    pub translate: TranslateConfig,
    pub separator: SeparatorConfig,
    pub hallucinations: HallucinationConfig,
    pub media: MediaConfig,
    pub performance: PerformanceOverrides,
    /// Target languages keyed by ISO 639-1 code.
    pub languages: BTreeMap<String, LanguageTarget>,
    /// Recognized video file extensions (lowercase, without dot).
    pub video_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    /// Runner command hosting the transcription model
    pub runner_command: String,
    /// Whisper model size (e.g. "large-v3")
    pub model_size: String,
    /// Forced source language; None enables auto-detection
    pub language: Option<String>,
    /// Initial prompt fed to the decoder; None disables prompting
    pub initial_prompt: Option<String>,
    /// Isolate vocals before transcribing
    pub use_vocal_separation: bool,
    /// Minimum silence duration for voice activity detection (ms)
    pub vad_min_silence_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Runner command hosting the translation model
    pub runner_command: String,
    /// Translation model identifier
    pub model_id: String,
    /// Beam search width
    pub num_beams: u32,
    /// Length penalty applied during generation
    pub length_penalty: f64,
    /// Repetition penalty applied during generation
    pub repetition_penalty: f64,
    /// N-gram blocking size; 0 disables
    pub no_repeat_ngram_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparatorConfig {
    /// Runner command hosting the vocal separation model
    pub runner_command: String,
    /// Separator model identifier
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationConfig {
    /// Discard segments above this no-speech probability
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f64,
    /// Flag a transcription when one segment repeats this many times
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: u32,
    /// Known phrases whisper emits on unintelligible audio
    pub known_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
}

/// Explicit user overrides that win over profile-derived settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceOverrides {
    pub batch_size: Option<usize>,
    pub beam_size: Option<u32>,
    pub thread_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageTarget {
    /// NLLB language code (e.g. "spa_Latn")
    pub code: String,
    /// Human-readable label embedded as track metadata
    pub label: String,
}

// ISO 639-1 to NLLB code mapping (static fallback when a language is not in
// the configured table).
const ISO_TO_NLLB: &[(&str, &str)] = &[
    ("en", "eng_Latn"),
    ("es", "spa_Latn"),
    ("fr", "fra_Latn"),
    ("de", "deu_Latn"),
    ("it", "ita_Latn"),
    ("pt", "por_Latn"),
    ("ru", "rus_Cyrl"),
    ("zh", "zho_Hans"),
    ("ja", "jpn_Jpan"),
    ("ko", "kor_Hang"),
    ("hi", "hin_Deva"),
    ("ar", "arb_Arab"),
    ("ro", "ron_Latn"),
    ("bg", "bul_Cyrl"),
    ("cs", "ces_Latn"),
    ("pl", "pol_Latn"),
    ("hu", "hun_Latn"),
    ("uk", "ukr_Cyrl"),
    ("sk", "slk_Latn"),
    ("sl", "slv_Latn"),
    ("sr", "srp_Cyrl"),
    ("hr", "hrv_Latn"),
    ("el", "ell_Grek"),
    ("tr", "tur_Latn"),
    ("nl", "nld_Latn"),
    ("sv", "swe_Latn"),
    ("da", "dan_Latn"),
    ("fi", "fin_Latn"),
    ("no", "nob_Latn"),
    ("et", "est_Latn"),
    ("lv", "lav_Latn"),
    ("lt", "lit_Latn"),
    ("th", "tha_Thai"),
    ("vi", "vie_Latn"),
    ("id", "ind_Latn"),
    ("ms", "zsm_Latn"),
    ("he", "heb_Hebr"),
    ("bn", "ben_Beng"),
    ("ta", "tam_Tamil"),
    ("te", "tel_Telu"),
    ("sw", "swh_Latn"),
    ("am", "amh_Ethi"),
    ("af", "afr_Latn"),
    ("hy", "hye_Armn"),
    ("ka", "kat_Geor"),
    ("az", "azj_Latn"),
    ("be", "bel_Cyrl"),
];

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JimakuError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| JimakuError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| JimakuError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| JimakuError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Returns the NLLB code for an ISO 639-1 code, preferring the configured
    /// language table over the static map. Defaults to English.
    pub fn nllb_code(&self, iso_code: &str) -> String {
        if let Some(target) = self.languages.get(iso_code) {
            return target.code.clone();
        }
        ISO_TO_NLLB
            .iter()
            .find(|(iso, _)| *iso == iso_code)
            .map(|(_, nllb)| (*nllb).to_string())
            .unwrap_or_else(|| "eng_Latn".to_string())
    }

    /// Label for an ISO code, falling back to the uppercased code.
    pub fn language_label(&self, iso_code: &str) -> String {
        self.languages
            .get(iso_code)
            .map(|t| t.label.clone())
            .unwrap_or_else(|| iso_code.to_uppercase())
    }

    pub fn is_video_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.video_extensions.iter().any(|ext| *ext == lower)
            })
            .unwrap_or(false)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut languages = BTreeMap::new();
        for (iso, label) in [("en", "English"), ("es", "Spanish"), ("fr", "French")] {
            let code = ISO_TO_NLLB
                .iter()
                .find(|(i, _)| *i == iso)
                .map(|(_, c)| (*c).to_string())
                .unwrap_or_default();
            languages.insert(
                iso.to_string(),
                LanguageTarget {
                    code,
                    label: label.to_string(),
                },
            );
        }

        Self {
            whisper: WhisperConfig {
                runner_command: "whisper-runner".to_string(),
                model_size: "large-v3".to_string(),
                language: None,
                initial_prompt: Some("Transcribe the following audio file.".to_string()),
                use_vocal_separation: true,
                vad_min_silence_ms: 500,
            },
            translate: TranslateConfig {
                runner_command: "nllb-runner".to_string(),
                model_id: "facebook/nllb-200-3.3B".to_string(),
                num_beams: 5,
                length_penalty: 1.0,
                repetition_penalty: 1.0,
                no_repeat_ngram_size: 0,
            },
            separator: SeparatorConfig {
                runner_command: "separator-runner".to_string(),
                model_id: "model_bs_roformer_ep_317_sdr_12.9755.ckpt".to_string(),
            },
            hallucinations: HallucinationConfig {
                silence_threshold: default_silence_threshold(),
                repetition_threshold: default_repetition_threshold(),
                known_phrases: [
                    "thank you for watching",
                    "thanks for watching",
                    "subscribe to my channel",
                    "please subscribe",
                    "like and subscribe",
                    "hit the like button",
                    "leave a comment",
                    "share this video",
                    "see you in the next",
                    "merci d'avoir regardé",
                    "n'oubliez pas de vous abonner",
                    "danke fürs zuschauen",
                    "gracias por ver",
                    "no olvides suscribirte",
                    "grazie per aver guardato",
                    "nu uitați să dați like",
                    "abonați-vă la canal",
                    "vă mulțumim pentru vizionare",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            },
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
            },
            performance: PerformanceOverrides::default(),
            languages,
            video_extensions: ["mp4", "mkv", "mov", "avi", "webm", "flv", "m4v", "ts", "mts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
