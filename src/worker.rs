//! Worker-process side of the isolated translation boundary.
//!
//! Invoked as `jimaku worker --manifest <path>` by the parent process. The
//! worker owns the translation model for its whole lifetime: it detects
//! hardware on its own, loads the model once, drives every job in the
//! manifest through the batch scheduler, commits each finished track
//! atomically, and writes a report file as its final act. Whatever happens
//! to this process, device memory is reclaimed when it exits.

use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::error::{JimakuError, Result};
use crate::hardware::{self, NvidiaSmiProbe};
use crate::isolation::{JobReport, JobStatus, TranslationManifest, WorkerReport};
use crate::model::{ModelKind, ModelManager};
use crate::providers::NllbBackend;
use crate::scheduler::{BatchState, ItemOutcome, TranslationBatch, run_batches};
use crate::subtitle::{Segment, parse_srt, render_srt};
use crate::writer::{commit_atomic, is_intact_subtitle};

/// Placeholder kept in the output when one segment cannot be translated.
/// The track stays usable and the marker is easy to search for.
const FAILED_ITEM_PLACEHOLDER: &str = "[Translation Error]";

pub async fn run_worker(manifest_path: &Path) -> Result<()> {
    let manifest = TranslationManifest::load(manifest_path)?;
    info!(
        "Worker started for run {} with {} job(s)",
        manifest.run_id,
        manifest.jobs.len()
    );

    let descriptor = hardware::detect(&NvidiaSmiProbe);
    let profile = hardware::select_profile(&descriptor, manifest.config.translate.num_beams)
        .with_overrides(&manifest.config.performance);
    info!(
        "Worker profile: tier {} on {}, max batch {}",
        profile.tier, profile.device, profile.max_batch_size
    );

    let source_text = fs::read_to_string(&manifest.source_srt).map_err(|e| {
        JimakuError::FileNotFound(format!(
            "source subtitles {}: {}",
            manifest.source_srt.display(),
            e
        ))
    })?;
    let source_segments = parse_srt(&source_text);
    if source_segments.is_empty() {
        return Err(JimakuError::Integrity(format!(
            "source subtitles {} contain no segments",
            manifest.source_srt.display()
        )));
    }
    let texts: Vec<String> = source_segments.iter().map(|s| s.text.clone()).collect();

    let mut manager = ModelManager::new(profile);
    manager.register(
        ModelKind::Translation,
        Box::new(NllbBackend::new(manifest.config.translate.clone())),
    );

    // One sizing state for the whole run: a watermark learned on the first
    // language still binds the last one.
    let mut state = BatchState::new(manager.profile().max_batch_size);
    let mut job_reports = Vec::with_capacity(manifest.jobs.len());

    for job in &manifest.jobs {
        if is_intact_subtitle(&job.output) {
            info!("Skipping {}: output already committed", job.language);
            job_reports.push(JobReport {
                language: job.language.clone(),
                status: JobStatus::Skipped,
                failed_items: 0,
                error: None,
            });
            continue;
        }

        let report = match translate_job(
            &mut manager,
            &mut state,
            &source_segments,
            &texts,
            &manifest.source_nllb_code,
            job,
        )
        .await
        {
            Ok(failed_items) => JobReport {
                language: job.language.clone(),
                status: if failed_items == 0 {
                    JobStatus::Done
                } else {
                    JobStatus::Failed
                },
                failed_items,
                error: None,
            },
            Err(e) => {
                error!("Job {} failed: {}", job.language, e);
                JobReport {
                    language: job.language.clone(),
                    status: JobStatus::Failed,
                    failed_items: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        job_reports.push(report);
    }

    manager.release_all().await;

    let report = WorkerReport {
        run_id: manifest.run_id.clone(),
        finished_at: Utc::now(),
        batch_failures: state.failure_count(),
        final_batch_size: state.current(),
        jobs: job_reports,
    };
    report.save(&manifest.report_path())?;
    info!("Worker finished run {}", manifest.run_id);
    Ok(())
}

/// Translates one language and commits its track. Returns the number of
/// items that could not be translated (kept as placeholders).
async fn translate_job(
    manager: &mut ModelManager,
    state: &mut BatchState,
    source_segments: &[Segment],
    texts: &[String],
    source_code: &str,
    job: &crate::isolation::TranslationJob,
) -> Result<u32> {
    info!(
        "Translating {} segment(s) into {} ({})",
        texts.len(),
        job.label,
        job.nllb_code
    );

    let provider = manager.translator().await?;
    let mut executor = TranslationBatch {
        provider,
        source: source_code.to_string(),
        target: job.nllb_code.clone(),
    };

    let mut translated: Vec<Segment> = source_segments.to_vec();
    let mut failed_items: u32 = 0;

    run_batches(state, texts, &mut executor, &mut |index, outcome| {
        match outcome {
            ItemOutcome::Done(text) => translated[index].text = text,
            ItemOutcome::Failed(message) => {
                warn!("Segment {} for {} failed: {}", index, job.language, message);
                translated[index].text = FAILED_ITEM_PLACEHOLDER.to_string();
                failed_items += 1;
            }
        }
        Ok(())
    })
    .await?;

    commit_atomic(&job.output, &render_srt(&translated))?;
    if failed_items > 0 {
        warn!(
            "{}: committed with {} untranslatable segment(s)",
            job.language, failed_items
        );
    }
    Ok(failed_items)
}
