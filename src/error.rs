use thiserror::Error;

#[derive(Error, Debug)]
pub enum JimakuError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Hardware query failed: {0}")]
    Hardware(String),

    #[error("Device memory exhausted: {0}")]
    MemoryExhaustion(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Isolated stage failed: {0}")]
    IsolatedStage(String),

    #[error("Output integrity check failed: {0}")]
    Integrity(String),

    #[error("Commit error: {0}")]
    Commit(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Vocal separation error: {0}")]
    Separation(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Interrupted by signal")]
    Interrupted,
}

impl JimakuError {
    /// Whether this error is the recoverable memory-exhaustion signal the
    /// batch scheduler reacts to. Everything else is an ordinary failure.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, JimakuError::MemoryExhaustion(_))
    }
}

/// Native backend failure messages that mean "allocation could not be
/// satisfied". Backends do not agree on a structured signal, so adapters
/// funnel free-text errors through this classifier.
pub fn is_exhaustion_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "out of memory",
        "cuda error: out of memory",
        "cublas_status_alloc_failed",
        "hip out of memory",
        "cannot allocate memory",
        "failed to allocate",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

pub type Result<T> = std::result::Result<T, JimakuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_classifier() {
        assert!(is_exhaustion_message("CUDA error: out of memory"));
        assert!(is_exhaustion_message(
            "RuntimeError: CUBLAS_STATUS_ALLOC_FAILED when calling cublasCreate"
        ));
        assert!(is_exhaustion_message("failed to allocate 512.00 MiB"));
        assert!(!is_exhaustion_message("model file not found"));
        assert!(!is_exhaustion_message("connection refused"));
    }

    #[test]
    fn test_is_exhaustion_variant() {
        assert!(JimakuError::MemoryExhaustion("oom".to_string()).is_exhaustion());
        assert!(!JimakuError::Translation("bad batch".to_string()).is_exhaustion());
    }
}
