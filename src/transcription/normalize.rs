// transcription/normalize.rs
//
// Builds the canonical result record from the extracted worker payload,
// filling defaults from the task context and deriving merged segments,
// speaker rollups, and the flat transcript.

use serde_json::Value;

use super::merge::{format_clock, merge_segments, speaker_stats, MergePolicy, SpeakerStat};
use super::types::{CanonicalResult, Segment, SpeakerSummary, TaskRequest, FALLBACK_ERROR, UNKNOWN_SPEAKER};

/// Diagnostic used when a zero-exit worker produced no parsable result
pub const PARSE_FAILURE_MESSAGE: &str = "Failed to parse transcription result";

/// Diagnostic used when a failed worker left no stderr output
pub const PROCESS_FAILURE_MESSAGE: &str = "Transcription process failed";

const FALLBACK_DEVICE: &str = "unknown";

/// Build the canonical result from an extracted payload.
///
/// Returns `None` when the payload is absent or progress-shaped; the caller
/// decides between the parse-failure and process-failure diagnostics based
/// on the worker's exit status.
pub fn normalize_result(
    payload: Option<&Value>,
    request: &TaskRequest,
    policy: &MergePolicy,
) -> Option<CanonicalResult> {
    let payload = payload?;
    let object = payload.as_object()?;
    if object.get("type").and_then(Value::as_str) == Some("progress") || object.contains_key("stage") {
        return None;
    }

    // Structured failure emitted by the worker itself
    if object.get("type").and_then(Value::as_str) == Some("error") && !object.contains_key("success") {
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(FALLBACK_ERROR);
        return Some(CanonicalResult::failure(request, message));
    }

    let success = object.get("success").and_then(Value::as_bool).unwrap_or(true);
    if !success {
        let message = object
            .get("error")
            .or_else(|| object.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(FALLBACK_ERROR);
        return Some(CanonicalResult::failure(request, message));
    }

    let metadata = object.get("metadata").and_then(Value::as_object);
    let scalar = |key: &str| -> Option<&str> {
        object
            .get(key)
            .and_then(Value::as_str)
            .or_else(|| metadata.and_then(|m| m.get(key)).and_then(Value::as_str))
    };

    let file = object
        .get("file")
        .and_then(Value::as_str)
        .or_else(|| metadata.and_then(|m| m.get("audio_file")).and_then(Value::as_str))
        .unwrap_or(&request.source_label)
        .to_string();
    let model = scalar("model").map(str::to_string).unwrap_or_else(|| request.model.clone());
    let device = scalar("device").unwrap_or(FALLBACK_DEVICE).to_string();
    let language = scalar("language")
        .map(str::to_string)
        .or_else(|| request.language.clone())
        .unwrap_or_else(|| "auto".to_string());
    let duration = object
        .get("duration")
        .and_then(Value::as_f64)
        .or_else(|| metadata.and_then(|m| m.get("duration")).and_then(Value::as_f64))
        .unwrap_or(0.0);

    let raw_segments: Vec<Segment> = object
        .get("segments")
        .and_then(Value::as_array)
        .map(|list| list.iter().map(Segment::from_value).collect())
        .unwrap_or_default();
    let raw_segment_count = raw_segments.len();
    let segments = merge_segments(raw_segments, policy);
    let merged_segment_count = segments.len();
    let stats = speaker_stats(&segments);

    let speakers = resolve_speakers(object.get("speakers"), &stats);

    let transcription = object
        .get("transcription")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            segments
                .iter()
                .map(|segment| segment.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string()
        });

    let has_diarization = object
        .get("has_diarization")
        .and_then(Value::as_bool)
        .unwrap_or(request.diarization);
    let is_partial = object
        .get("is_partial")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let formatted_output = object
        .get("formatted_output")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(CanonicalResult {
        success: true,
        file,
        model,
        device,
        language,
        duration,
        segments,
        raw_segment_count,
        merged_segment_count,
        speakers,
        transcription,
        has_diarization,
        is_partial,
        formatted_output,
        error: None,
    })
}

/// Speaker list resolution, in priority order: explicit payload list (with
/// missing totals backfilled from merged-segment stats), payload id->count
/// mapping, then a list synthesized entirely from the stats.
fn resolve_speakers(payload_speakers: Option<&Value>, stats: &[SpeakerStat]) -> Vec<SpeakerSummary> {
    if let Some(list) = payload_speakers.and_then(Value::as_array) {
        return list
            .iter()
            .map(|entry| {
                let id = entry
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_SPEAKER)
                    .to_string();
                let segment_count = entry
                    .get("segment_count")
                    .and_then(Value::as_u64)
                    .or_else(|| stat_for(stats, &id).map(|s| s.count))
                    .unwrap_or(0);
                let total_time = entry
                    .get("total_time")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format_clock(stat_for(stats, &id).map_or(0.0, |s| s.duration_secs))
                    });
                SpeakerSummary {
                    id,
                    segment_count,
                    total_time,
                }
            })
            .collect();
    }

    if let Some(map) = payload_speakers.and_then(Value::as_object) {
        return map
            .iter()
            .map(|(id, count)| SpeakerSummary {
                id: id.clone(),
                segment_count: count.as_u64().unwrap_or(0),
                total_time: format_clock(stat_for(stats, id).map_or(0.0, |s| s.duration_secs)),
            })
            .collect();
    }

    stats
        .iter()
        .map(|stat| SpeakerSummary {
            id: stat.id.clone(),
            segment_count: stat.count,
            total_time: format_clock(stat.duration_secs),
        })
        .collect()
}

fn stat_for<'a>(stats: &'a [SpeakerStat], id: &str) -> Option<&'a SpeakerStat> {
    stats.iter().find(|stat| stat.id == id)
}
