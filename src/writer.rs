//! Resumable subtitle output with atomic commits.
//!
//! Every completed output is committed immediately by writing to a temporary
//! file in the destination directory and renaming it into place, so a crash
//! or kill leaves either the previous state or the complete new file, never
//! a truncated one. Restart scanning trusts only outputs that pass the
//! integrity check; anything truncated or garbage is redone.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{JimakuError, Result};
use crate::subtitle::{Segment, render_srt};

/// Minimum plausible size for a committed subtitle file.
const MIN_SUBTITLE_BYTES: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Done,
    Failed,
}

/// One unit of resumable work: a target language and its output path.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub language: String,
    pub output: PathBuf,
    pub status: ItemStatus,
}

impl WorkItem {
    pub fn new(language: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            language: language.into(),
            output: output.into(),
            status: ItemStatus::Pending,
        }
    }
}

/// Returns true when `path` holds a structurally plausible subtitle file:
/// non-trivially sized, starting with a cue index digit, and containing at
/// least one timing arrow. Catches truncation and interleaved garbage from
/// interrupted runs without parsing the whole file.
pub fn is_intact_subtitle(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.len() < MIN_SUBTITLE_BYTES {
        return false;
    }
    let Ok(content) = fs::read_to_string(path) else {
        return false;
    };
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    let starts_with_index = trimmed.chars().next().is_some_and(|c| c.is_ascii_digit());
    starts_with_index && content.contains(" --> ")
}

/// Marks items whose outputs already exist intact as done. Intact outputs
/// survive restarts; corrupt ones are removed and left pending.
pub fn reconcile_existing(items: &mut [WorkItem]) {
    for item in items.iter_mut() {
        if item.output.exists() {
            if is_intact_subtitle(&item.output) {
                debug!("Skipping {}: output already present", item.language);
                item.status = ItemStatus::Done;
            } else {
                warn!(
                    "Discarding corrupt output {}",
                    item.output.display()
                );
                if let Err(e) = fs::remove_file(&item.output) {
                    warn!("Could not remove corrupt output: {}", e);
                }
            }
        }
    }
}

/// Writes `content` to `destination` atomically: staged as a temporary file
/// in the same directory, flushed, then renamed over the destination.
pub fn commit_atomic(destination: &Path, content: &str) -> Result<()> {
    let dir = destination.parent().ok_or_else(|| {
        JimakuError::Commit(format!(
            "destination {} has no parent directory",
            destination.display()
        ))
    })?;
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| JimakuError::Commit(format!("could not stage temporary file: {}", e)))?;
    staged
        .write_all(content.as_bytes())
        .and_then(|_| staged.flush())
        .map_err(|e| JimakuError::Commit(format!("could not write staged output: {}", e)))?;

    // Same-directory rename keeps the swap atomic on one filesystem.
    staged
        .persist(destination)
        .map_err(|e| JimakuError::Commit(format!("could not commit output: {}", e)))?;

    debug!("Committed {}", destination.display());
    Ok(())
}

/// Renders and atomically commits a subtitle track.
pub fn commit_subtitles(destination: &Path, segments: &[Segment]) -> Result<()> {
    commit_atomic(destination, &render_srt(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    fn segments() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 1.5, "Hello".to_string()),
            Segment::new(2.0, 3.5, "World".to_string()),
        ]
    }

    #[test]
    fn test_commit_then_integrity_check() {
        let dir = TempDir::new().unwrap();
        let destination = dir.child("out.es.srt");

        commit_subtitles(destination.path(), &segments()).unwrap();
        assert!(destination.path().exists());
        assert!(is_intact_subtitle(destination.path()));
    }

    #[test]
    fn test_commit_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let destination = dir.child("out.srt");
        destination.write_str("old content").unwrap();

        commit_atomic(destination.path(), "1\n00:00:00,000 --> 00:00:01,000\nnew\n")
            .unwrap();
        let content = fs::read_to_string(destination.path()).unwrap();
        assert!(content.contains("new"));
        assert!(!content.contains("old"));
    }

    #[test]
    fn test_commit_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let destination = dir.child("out.srt");
        commit_atomic(destination.path(), "1\n00:00:00,000 --> 00:00:01,000\nhi\n")
            .unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_integrity_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let stub = dir.child("stub.srt");
        stub.write_str("1\n").unwrap();
        assert!(!is_intact_subtitle(stub.path()));
    }

    #[test]
    fn test_integrity_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.child("garbage.srt");
        garbage
            .write_str("error: traceback follows, not a subtitle at all")
            .unwrap();
        assert!(!is_intact_subtitle(garbage.path()));
    }

    #[test]
    fn test_integrity_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(!is_intact_subtitle(&dir.path().join("nope.srt")));
    }

    #[test]
    fn test_integrity_accepts_bom_prefixed_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("bom.srt");
        file.write_str("\u{feff}1\n00:00:00,000 --> 00:00:01,000\nhi\n")
            .unwrap();
        assert!(is_intact_subtitle(file.path()));
    }

    #[test]
    fn test_reconcile_marks_intact_done_and_removes_corrupt() {
        let dir = TempDir::new().unwrap();
        let good = dir.child("video.es.srt");
        good.write_str("1\n00:00:00,000 --> 00:00:01,000\nHola\n")
            .unwrap();
        let bad = dir.child("video.fr.srt");
        bad.write_str("x").unwrap();

        let mut items = vec![
            WorkItem::new("es", good.path()),
            WorkItem::new("fr", bad.path()),
            WorkItem::new("de", dir.path().join("video.de.srt")),
        ];
        reconcile_existing(&mut items);

        assert_eq!(items[0].status, ItemStatus::Done);
        assert_eq!(items[1].status, ItemStatus::Pending);
        assert!(!bad.path().exists());
        assert_eq!(items[2].status, ItemStatus::Pending);
    }
}
