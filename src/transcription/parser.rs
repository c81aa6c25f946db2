// transcription/parser.rs
//
// Incremental parser for the worker's stdout stream: PROGRESS: marker lines
// while running, RESULT: payload extraction once the stream ends. The worker
// is an opaque text emitter that interleaves human logs with exactly one
// embedded JSON result, so extraction has to tolerate noise before, after,
// and between the marker and the JSON.

use log::{debug, warn};
use serde_json::Value;

use super::types::ProgressUpdate;

/// Prefix of a machine-readable progress line
pub const PROGRESS_MARKER: &str = "PROGRESS:";

/// Token announcing the terminal result payload
pub const RESULT_MARKER: &str = "RESULT:";

/// Line-buffering parser over the subprocess stdout stream.
///
/// Chunk boundaries carry no meaning: a line may arrive split across any
/// number of chunks. Complete lines are classified as they arrive, and the
/// entire output is retained for the end-of-stream result extraction.
#[derive(Debug, Default)]
pub struct OutputParser {
    raw: String,
    pending: String,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stdout chunk, returning the progress updates whose lines
    /// completed inside it, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProgressUpdate> {
        let text = String::from_utf8_lossy(chunk);
        self.raw.push_str(&text);
        self.pending.push_str(&text);

        let mut updates = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(update) = parse_progress_line(line.trim_end_matches(['\r', '\n'])) {
                updates.push(update);
            }
        }
        updates
    }

    /// End of stream: classify any unterminated final line, then run the
    /// result extraction over the full accumulated output.
    pub fn finish(mut self) -> (Vec<ProgressUpdate>, Option<Value>) {
        let mut updates = Vec::new();
        if !self.pending.is_empty() {
            if let Some(update) = parse_progress_line(self.pending.trim_end()) {
                updates.push(update);
            }
        }
        let payload = extract_result(&self.raw);
        (updates, payload)
    }
}

/// Parse one complete line as a progress update. Malformed JSON after the
/// marker is dropped rather than failing the task.
fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let rest = line.strip_prefix(PROGRESS_MARKER)?;
    match serde_json::from_str::<ProgressUpdate>(rest.trim()) {
        Ok(update) => Some(update),
        Err(e) => {
            warn!("Dropping malformed progress line ({}): {}", e, line);
            None
        }
    }
}

/// Locate the terminal result payload anywhere in the worker's output.
///
/// Precedence, tried strictly in order:
/// 1. everything after the last RESULT: marker, parsed directly
/// 2. the first complete JSON object after that marker, found by
///    string-aware brace counting
/// 3. only when no marker exists at all, the same two passes over the
///    whole output
///
/// Each candidate must pass [`plausible_result`]; a marker whose tail
/// yields nothing plausible means extraction yields nothing.
pub fn extract_result(raw: &str) -> Option<Value> {
    if let Some(index) = raw.rfind(RESULT_MARKER) {
        let tail = &raw[index + RESULT_MARKER.len()..];
        if let Some(value) = parse_candidate(tail) {
            return Some(value);
        }
        if let Some(value) = scan_candidate(tail) {
            return Some(value);
        }
        // The marker scopes extraction to what follows it; a corrupt
        // payload there must not revive older JSON from the log noise
        debug!("RESULT marker present but no plausible payload after it");
        return None;
    }
    if let Some(value) = parse_candidate(raw) {
        return Some(value);
    }
    scan_candidate(raw)
}

fn parse_candidate(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    plausible_result(&value).then_some(value)
}

fn scan_candidate(text: &str) -> Option<Value> {
    let object = extract_json_object(text)?;
    let value: Value = serde_json::from_str(object).ok()?;
    plausible_result(&value).then_some(value)
}

/// First complete top-level JSON object in `text`, found by brace-depth
/// counting. A `{` or `}` inside a double-quoted string, including after
/// escaped quotes, does not change depth.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Guard against picking up stray JSON-looking log fragments: a candidate
/// counts as the result payload only if it is not progress-shaped and
/// carries at least one result-like field.
pub fn plausible_result(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    if object.get("type").and_then(Value::as_str) == Some("progress") {
        return false;
    }
    if object.contains_key("stage") {
        return false;
    }
    object.contains_key("success")
        || object.contains_key("segments")
        || object.contains_key("transcription")
        || object.contains_key("metadata")
        || object.get("type").and_then(Value::as_str) == Some("error")
}
