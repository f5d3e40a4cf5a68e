//! Client side of the model runner protocol.
//!
//! Each heavy model is hosted by a long-lived runner subprocess that speaks
//! newline-delimited JSON on stdin/stdout. Residency maps directly onto the
//! runner's lifetime: spawning the process loads the model onto its pinned
//! device, and killing the process is the reclamation mechanism.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use crate::error::{JimakuError, Result, is_exhaustion_message};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RunnerRequest {
    /// Load the model, pinned to one explicit device. Automatic placement
    /// that can spill to host memory defeats the profile guarantees, so the
    /// device is always concrete ("cuda:0", "cpu").
    Load {
        model: String,
        device: String,
        precision: String,
        threads: usize,
    },
    Transcribe {
        audio: PathBuf,
        language: Option<String>,
        initial_prompt: Option<String>,
        beam_size: u32,
        vad_min_silence_ms: u32,
    },
    Translate {
        texts: Vec<String>,
        source: String,
        target: String,
        num_beams: u32,
        length_penalty: f64,
        repetition_penalty: f64,
        no_repeat_ngram_size: u32,
    },
    Separate {
        audio: PathBuf,
        output_dir: PathBuf,
    },
    /// Drop caches and force collection after a memory-exhaustion event.
    Reclaim,
    Shutdown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<RunnerError>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerError {
    #[serde(default)]
    pub kind: String,
    pub message: String,
}

/// Handle to a spawned runner process.
pub struct RunnerClient {
    child: Child,
    stdin: ChildStdin,
    stdout: tokio::io::Lines<BufReader<ChildStdout>>,
    name: String,
    wrap: fn(String) -> JimakuError,
}

impl RunnerClient {
    /// Spawns the runner command. `wrap` converts non-exhaustion backend
    /// errors into the caller's error domain.
    pub async fn spawn(
        command: &str,
        name: &str,
        wrap: fn(String) -> JimakuError,
    ) -> Result<Self> {
        debug!("Spawning {} runner: {}", name, command);

        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            JimakuError::ModelLoad(format!("empty runner command for {}", name))
        })?;

        let mut child = tokio::process::Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                JimakuError::ModelLoad(format!("failed to spawn {} runner: {}", name, e))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            JimakuError::ModelLoad(format!("{} runner stdin unavailable", name))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            JimakuError::ModelLoad(format!("{} runner stdout unavailable", name))
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            name: name.to_string(),
            wrap,
        })
    }

    /// Sends one request and waits for the matching response line.
    pub async fn call(&mut self, request: &RunnerRequest) -> Result<Value> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        self.stdin.write_all(line.as_bytes()).await.map_err(|e| {
            (self.wrap)(format!("{} runner write failed: {}", self.name, e))
        })?;
        self.stdin.flush().await.map_err(|e| {
            (self.wrap)(format!("{} runner flush failed: {}", self.name, e))
        })?;

        let reply = self.stdout.next_line().await.map_err(|e| {
            (self.wrap)(format!("{} runner read failed: {}", self.name, e))
        })?;
        let Some(reply) = reply else {
            return Err((self.wrap)(format!(
                "{} runner closed its output unexpectedly",
                self.name
            )));
        };

        let response: RunnerResponse = serde_json::from_str(&reply).map_err(|e| {
            (self.wrap)(format!("{} runner sent malformed response: {}", self.name, e))
        })?;

        if response.ok {
            return Ok(response.payload);
        }

        let (kind, message) = match response.error {
            Some(err) => (err.kind, err.message),
            None => (String::new(), "unspecified runner error".to_string()),
        };

        if kind == "exhaustion" || is_exhaustion_message(&message) {
            Err(JimakuError::MemoryExhaustion(message))
        } else {
            Err((self.wrap)(message))
        }
    }

    /// Orderly shutdown with a kill fallback. Either way the process exits,
    /// which is what actually releases device memory.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.call(&RunnerRequest::Shutdown).await {
            warn!("{} runner ignored shutdown ({}), killing", self.name, e);
            self.child.kill().await.ok();
        }
        match self.child.wait().await {
            Ok(status) => {
                debug!("{} runner exited with {}", self.name, status);
                Ok(())
            }
            Err(e) => Err(JimakuError::ModelLoad(format!(
                "{} runner did not exit cleanly: {}",
                self.name, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = RunnerRequest::Load {
            model: "facebook/nllb-200-3.3B".to_string(),
            device: "cuda:0".to_string(),
            precision: "float16".to_string(),
            threads: 8,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"op\":\"load\""));
        assert!(json.contains("\"device\":\"cuda:0\""));
    }

    #[test]
    fn test_response_exhaustion_kind() {
        let raw = r#"{"ok":false,"error":{"kind":"exhaustion","message":"allocator failed"}}"#;
        let response: RunnerResponse = serde_json::from_str(raw).unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, "exhaustion");
    }

    #[test]
    fn test_response_payload_default() {
        let raw = r#"{"ok":true}"#;
        let response: RunnerResponse = serde_json::from_str(raw).unwrap();
        assert!(response.ok);
        assert!(response.payload.is_null());
    }
}
