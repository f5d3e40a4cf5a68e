use serde::{Deserialize, Serialize};

/// One timed subtitle segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds * 1000.0).round().max(0.0) as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse an SRT timestamp (HH:MM:SS,mmm) back to seconds. Malformed input
/// yields 0.0 rather than an error; parsing is tolerant by design because
/// corrupt files are filtered by the integrity check before use.
pub fn parse_srt_time(ts: &str) -> f64 {
    let mut parts = ts.trim().split(':');
    let (Some(h), Some(m), Some(s_ms)) = (parts.next(), parts.next(), parts.next()) else {
        return 0.0;
    };

    let (s, ms) = match s_ms.split_once(',').or_else(|| s_ms.split_once('.')) {
        Some((s, ms)) => (s, ms),
        None => (s_ms, "0"),
    };

    let h: f64 = h.trim().parse().unwrap_or(0.0);
    let m: f64 = m.trim().parse().unwrap_or(0.0);
    let s: f64 = s.trim().parse().unwrap_or(0.0);
    let ms: f64 = ms.trim().parse().unwrap_or(0.0);

    h * 3600.0 + m * 60.0 + s + ms / 1000.0
}

/// Render segments as SRT content. Segments are sorted chronologically
/// first; out-of-order segments corrupt players otherwise.
pub fn render_srt(segments: &[Segment]) -> String {
    let mut sorted: Vec<&Segment> = segments.iter().collect();
    sorted.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut content = String::new();
    for (index, segment) in sorted.iter().enumerate() {
        content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            segment.text.trim()
        ));
    }
    content
}

/// Parse SRT content back into segments, skipping garbage chunks.
/// Externally produced files often carry CRLF line endings; these are
/// normalized before chunking so blank-line separators are found.
pub fn parse_srt(content: &str) -> Vec<Segment> {
    let content = content.trim_start_matches('\u{feff}').replace('\r', "");
    let content = content.as_str();
    let mut segments = Vec::new();

    for chunk in content.split("\n\n") {
        let lines: Vec<&str> = chunk.trim().lines().collect();
        if lines.len() < 3 {
            continue;
        }
        if !lines[0].trim().chars().all(|c| c.is_ascii_digit()) || lines[0].trim().is_empty() {
            continue;
        }
        let Some((start_str, end_str)) = lines[1].split_once(" --> ") else {
            continue;
        };
        let start = parse_srt_time(start_str);
        let end = parse_srt_time(end_str);
        let text = lines[2..].join(" ");
        segments.push(Segment::new(start, end, text));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(65.123), "00:01:05,123");
        assert_eq!(format_srt_time(3661.500), "01:01:01,500");
    }

    #[test]
    fn test_parse_srt_time() {
        assert_eq!(parse_srt_time("00:01:05,123"), 65.123);
        assert_eq!(parse_srt_time("01:00:00,000"), 3600.0);
        assert_eq!(parse_srt_time("garbage"), 0.0);
    }

    #[test]
    fn test_render_sorts_segments() {
        let segments = vec![
            Segment::new(5.0, 6.0, "second"),
            Segment::new(1.0, 2.0, "first"),
        ];
        let srt = render_srt(&segments);
        let first_pos = srt.find("first").unwrap();
        let second_pos = srt.find("second").unwrap();
        assert!(first_pos < second_pos);
        assert!(srt.starts_with("1\n00:00:01,000 --> 00:00:02,000\nfirst"));
    }

    #[test]
    fn test_parse_roundtrip() {
        let segments = vec![
            Segment::new(0.5, 2.0, "hello world"),
            Segment::new(2.5, 4.0, "goodbye"),
        ];
        let parsed = parse_srt(&render_srt(&segments));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "hello world");
        assert_eq!(parsed[1].start, 2.5);
    }

    #[test]
    fn test_parse_handles_crlf_line_endings() {
        let content = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nfirst line\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nsecond line\r\n";
        let parsed = parse_srt(content);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "first line");
        assert_eq!(parsed[1].start, 3.0);
    }

    #[test]
    fn test_parse_skips_garbage_chunks() {
        let content = "not an index\nrandom\nlines\n\n1\n00:00:01,000 --> 00:00:02,000\nvalid\n\n";
        let parsed = parse_srt(content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "valid");
    }
}
