//! Parent side of the isolated translation boundary.
//!
//! Translation runs inside a separate worker process (this same binary,
//! re-invoked with the hidden `worker` subcommand) so that a native crash or
//! an OOM kill during inference takes down the worker, not the whole
//! pipeline. The two processes share nothing but a manifest file going in
//! and a report file coming out; progress is observed by watching the
//! worker's committed outputs appear on disk.

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{JimakuError, Result};
use crate::writer::is_intact_subtitle;

/// One target language the worker must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationJob {
    pub language: String,
    pub nllb_code: String,
    pub label: String,
    pub output: PathBuf,
}

/// Everything the worker needs, written to disk before it starts. The
/// worker re-detects hardware itself; only intent crosses the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub source_srt: PathBuf,
    pub source_nllb_code: String,
    pub work_dir: PathBuf,
    pub jobs: Vec<TranslationJob>,
    pub config: Config,
}

impl TranslationManifest {
    pub fn new(
        source_srt: PathBuf,
        source_nllb_code: String,
        work_dir: PathBuf,
        jobs: Vec<TranslationJob>,
        config: Config,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source_srt,
            source_nllb_code,
            work_dir,
            jobs,
            config,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join(format!("manifest-{}.json", self.run_id))
    }

    pub fn report_path(&self) -> PathBuf {
        self.work_dir.join(format!("report-{}.json", self.run_id))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| JimakuError::IsolatedStage(format!("unreadable manifest: {}", e)))
    }

    pub fn save(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_dir)?;
        let path = self.manifest_path();
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub language: String,
    pub status: JobStatus,
    #[serde(default)]
    pub failed_items: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Written by the worker as its last act before exiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub run_id: String,
    pub finished_at: DateTime<Utc>,
    pub batch_failures: u32,
    pub final_batch_size: usize,
    pub jobs: Vec<JobReport>,
}

impl WorkerReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| JimakuError::IsolatedStage(format!("unreadable worker report: {}", e)))
    }
}

fn committed_outputs(jobs: &[TranslationJob]) -> u64 {
    jobs.iter()
        .filter(|job| is_intact_subtitle(&job.output))
        .count() as u64
}

/// Runs the worker process to completion and returns its report.
///
/// Ctrl-C kills the worker and surfaces as `Interrupted`; already-committed
/// outputs survive and a later run resumes past them. A worker that dies
/// without leaving a report (native crash, OOM kill) becomes an
/// `IsolatedStage` error.
pub async fn run_isolated(manifest: &TranslationManifest) -> Result<WorkerReport> {
    let manifest_path = manifest.save()?;
    let report_path = manifest.report_path();

    let exe = std::env::current_exe()
        .map_err(|e| JimakuError::IsolatedStage(format!("cannot locate own binary: {}", e)))?;
    info!(
        "Starting isolated translation worker for {} job(s) (run {})",
        manifest.jobs.len(),
        manifest.run_id
    );

    let mut child = tokio::process::Command::new(exe)
        .arg("worker")
        .arg("--manifest")
        .arg(&manifest_path)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JimakuError::IsolatedStage(format!("failed to start worker: {}", e)))?;

    let progress = ProgressBar::new(manifest.jobs.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} languages {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| {
                    JimakuError::IsolatedStage(format!("worker wait failed: {}", e))
                })?;
            }
            signal = tokio::signal::ctrl_c() => {
                progress.abandon_with_message("interrupted");
                if let Err(e) = signal {
                    warn!("Signal handler failed: {}", e);
                }
                child.kill().await.ok();
                return Err(JimakuError::Interrupted);
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                progress.set_position(committed_outputs(&manifest.jobs));
            }
        }
    };

    progress.set_position(committed_outputs(&manifest.jobs));
    progress.finish_and_clear();

    if !report_path.exists() {
        return Err(JimakuError::IsolatedStage(format!(
            "worker exited with {} before writing a report",
            status
        )));
    }

    let report = WorkerReport::load(&report_path)?;
    if !status.success() {
        warn!("Worker exited with {} but left a report, using it", status);
    }
    fs::remove_file(&manifest_path).ok();
    fs::remove_file(&report_path).ok();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> TranslationManifest {
        TranslationManifest::new(
            PathBuf::from("/tmp/video.en.srt"),
            "eng_Latn".to_string(),
            PathBuf::from("/tmp/work"),
            vec![TranslationJob {
                language: "es".to_string(),
                nllb_code: "spa_Latn".to_string(),
                label: "Español".to_string(),
                output: PathBuf::from("/tmp/video.es.srt"),
            }],
            Config::default(),
        )
    }

    #[test]
    fn test_manifest_round_trip() {
        let original = manifest();
        let json = serde_json::to_string(&original).unwrap();
        let parsed: TranslationManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, original.run_id);
        assert_eq!(parsed.jobs.len(), 1);
        assert_eq!(parsed.jobs[0].nllb_code, "spa_Latn");
    }

    #[test]
    fn test_paths_are_scoped_to_run() {
        let m = manifest();
        let name = m.manifest_path();
        assert!(name.to_string_lossy().contains(&m.run_id));
        assert_ne!(m.manifest_path(), m.report_path());
    }

    #[test]
    fn test_report_round_trip() {
        let report = WorkerReport {
            run_id: "abc".to_string(),
            finished_at: Utc::now(),
            batch_failures: 2,
            final_batch_size: 8,
            jobs: vec![JobReport {
                language: "es".to_string(),
                status: JobStatus::Failed,
                failed_items: 3,
                error: Some("runner hiccup".to_string()),
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\": \"failed\"") || json.contains("\"status\":\"failed\""));
        let parsed: WorkerReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.jobs[0].status, JobStatus::Failed);
        assert_eq!(parsed.batch_failures, 2);
    }
}
