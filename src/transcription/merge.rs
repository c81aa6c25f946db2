// transcription/merge.rs
//
// Segment merge policy: coalesce short per-utterance ASR segments into
// natural speaker turns without merging across genuine pauses or building
// runaway-length blocks.

use std::collections::BTreeMap;

use super::types::{Segment, UNKNOWN_SPEAKER};

/// Thresholds controlling when two adjacent same-speaker segments merge.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// Maximum silence between same-speaker segments, in seconds
    pub max_gap_secs: f64,
    /// Maximum combined text length of one merged turn, in characters
    pub max_merged_chars: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            max_gap_secs: 15.0,
            max_merged_chars: 1200,
        }
    }
}

/// Per-speaker totals derived from merged segments.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerStat {
    pub id: String,
    pub count: u64,
    pub duration_secs: f64,
}

/// Merge raw segments into speaker turns.
///
/// Segments are normalized (times clamped to >= 0, text trimmed, missing
/// speaker defaulted), empty-text entries dropped, then sorted by start
/// time and walked once. Two adjacent segments merge only when they share
/// a speaker, the gap between them is within `max_gap_secs`, and the
/// combined text stays within `max_merged_chars`.
pub fn merge_segments(raw: Vec<Segment>, policy: &MergePolicy) -> Vec<Segment> {
    let mut segments: Vec<Segment> = raw
        .into_iter()
        .map(normalize)
        .filter(|segment| !segment.text.is_empty())
        .collect();
    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    let mut current: Option<Segment> = None;

    for next in segments {
        let Some(mut open) = current.take() else {
            current = Some(next);
            continue;
        };

        let gap = (next.start - open.end).max(0.0);
        let joined = join_text(&open.text, &next.text);
        if next.speaker == open.speaker
            && gap <= policy.max_gap_secs
            && joined.chars().count() <= policy.max_merged_chars
        {
            open.end = open.end.max(next.end);
            open.text = joined;
            current = Some(open);
        } else {
            merged.push(open);
            current = Some(next);
        }
    }

    if let Some(open) = current {
        merged.push(open);
    }
    merged
}

/// Per-speaker segment counts and cumulative speaking time, id-sorted.
pub fn speaker_stats(segments: &[Segment]) -> Vec<SpeakerStat> {
    let mut totals: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
    for segment in segments {
        let entry = totals.entry(segment.speaker.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += segment.duration();
    }
    totals
        .into_iter()
        .map(|(id, (count, duration_secs))| SpeakerStat {
            id: id.to_string(),
            count,
            duration_secs,
        })
        .collect()
}

/// Clock-style duration: "M:SS", or "H:MM:SS" from one hour up.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

fn normalize(mut segment: Segment) -> Segment {
    if !segment.start.is_finite() || segment.start < 0.0 {
        segment.start = 0.0;
    }
    if !segment.end.is_finite() || segment.end < 0.0 {
        segment.end = 0.0;
    }
    segment.text = segment.text.trim().to_string();
    if segment.speaker.is_empty() {
        segment.speaker = UNKNOWN_SPEAKER.to_string();
    }
    segment
}

/// Punctuation-aware concatenation: no separator when the left side already
/// ends in whitespace, when the right side opens with sentence-terminal or
/// comma punctuation (ASCII or CJK), or when the join point sits between two
/// CJK ideographs. Otherwise a single space.
fn join_text(left: &str, right: &str) -> String {
    if left.is_empty() {
        return right.to_string();
    }
    if right.is_empty() {
        return left.to_string();
    }

    let left_last = left.chars().next_back();
    let right_first = right.chars().next();

    let no_separator = left_last.is_some_and(char::is_whitespace)
        || right_first.is_some_and(is_joining_punctuation)
        || (left_last.is_some_and(is_cjk) && right_first.is_some_and(is_cjk));

    if no_separator {
        format!("{}{}", left, right)
    } else {
        format!("{} {}", left, right)
    }
}

fn is_joining_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ',' | ';' | ':' | '!' | '?' | '，' | '。' | '；' | '：' | '！' | '？' | '、'
    )
}

fn is_cjk(c: char) -> bool {
    ('\u{3400}'..='\u{9FFF}').contains(&c)
}
