//! Transcription hygiene.
//!
//! Speech models emit stock phrases over silence and music ("thanks for
//! watching", looping captions), and occasionally get stuck repeating one
//! line for minutes. Both pollute the subtitle track and waste translation
//! batches, so they are filtered before anything downstream sees them.

use tracing::{debug, info};

use crate::config::HallucinationConfig;
use crate::providers::TimedSegment;
use crate::subtitle::Segment;

fn normalize(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c == '.' || c == '!' || c == '?' || c == '…')
        .to_lowercase()
}

fn is_known_phrase(config: &HallucinationConfig, text: &str) -> bool {
    let normalized = normalize(text);
    config
        .known_phrases
        .iter()
        .any(|phrase| normalize(phrase) == normalized)
}

/// Drops hallucinated segments and collapses stuck repetition loops.
///
/// A segment is hallucinated when its text is a known stock phrase and the
/// model itself judged the span as probable non-speech. A repetition loop is
/// a run of identical texts at least `repetition_threshold` long; only the
/// first segment of the run is kept.
pub fn filter_hallucinations(
    segments: Vec<TimedSegment>,
    config: &HallucinationConfig,
) -> Vec<Segment> {
    let before = segments.len();
    let mut kept: Vec<Segment> = Vec::with_capacity(before);
    let mut run_text = String::new();
    let mut run_length: usize = 0;

    for segment in segments {
        let text = segment.text.trim().to_string();
        if text.is_empty() {
            continue;
        }

        if segment.no_speech_prob > config.silence_threshold && is_known_phrase(config, &text) {
            debug!(
                "Dropping hallucinated segment at {:.2}s: {:?}",
                segment.start, text
            );
            continue;
        }

        let normalized = normalize(&text);
        if normalized == run_text {
            run_length += 1;
            if run_length >= config.repetition_threshold as usize {
                continue;
            }
        } else {
            run_text = normalized;
            run_length = 1;
        }

        kept.push(Segment::new(segment.start, segment.end, text));
    }

    if kept.len() < before {
        info!("Filtered {} suspect segments", before - kept.len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, text: &str, no_speech_prob: f64) -> TimedSegment {
        TimedSegment {
            start,
            end: start + 1.0,
            text: text.to_string(),
            no_speech_prob,
        }
    }

    fn config() -> HallucinationConfig {
        HallucinationConfig {
            silence_threshold: 0.9,
            repetition_threshold: 3,
            known_phrases: vec![
                "Thanks for watching!".to_string(),
                "Subtitles by the community".to_string(),
            ],
        }
    }

    #[test]
    fn test_drops_known_phrase_over_silence() {
        let segments = vec![
            segment(0.0, "Real dialogue.", 0.1),
            segment(5.0, "Thanks for watching!", 0.97),
        ];
        let kept = filter_hallucinations(segments, &config());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Real dialogue.");
    }

    #[test]
    fn test_keeps_known_phrase_over_actual_speech() {
        // A character can genuinely say the phrase; only silence spans are suspect.
        let segments = vec![segment(0.0, "Thanks for watching!", 0.05)];
        let kept = filter_hallucinations(segments, &config());
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_phrase_match_ignores_case_and_punctuation() {
        let segments = vec![segment(0.0, "  thanks for watching  ", 0.99)];
        let kept = filter_hallucinations(segments, &config());
        assert!(kept.is_empty());
    }

    #[test]
    fn test_collapses_repetition_loop() {
        let mut segments: Vec<TimedSegment> =
            (0..10).map(|i| segment(i as f64, "I see.", 0.1)).collect();
        segments.push(segment(20.0, "Finally something else.", 0.1));

        let kept = filter_hallucinations(segments, &config());
        // threshold 3: first two repeats survive, the loop tail is dropped
        let loops = kept.iter().filter(|s| s.text == "I see.").count();
        assert_eq!(loops, 2);
        assert_eq!(kept.last().unwrap().text, "Finally something else.");
    }

    #[test]
    fn test_repetition_counter_resets_on_new_text() {
        let segments = vec![
            segment(0.0, "One.", 0.1),
            segment(1.0, "One.", 0.1),
            segment(2.0, "Two.", 0.1),
            segment(3.0, "One.", 0.1),
            segment(4.0, "One.", 0.1),
        ];
        let kept = filter_hallucinations(segments, &config());
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn test_drops_empty_segments() {
        let segments = vec![segment(0.0, "   ", 0.1), segment(1.0, "Text.", 0.1)];
        let kept = filter_hallucinations(segments, &config());
        assert_eq!(kept.len(), 1);
    }
}
