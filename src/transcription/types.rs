// transcription/types.rs
//
// Segment, speaker, and result records plus the progress event shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

/// Speaker label used when the worker reports none
pub const UNKNOWN_SPEAKER: &str = "Unknown";

/// Model requested when the caller picks none (worker default)
pub const DEFAULT_MODEL: &str = "distil-large-v3";

pub(crate) const FALLBACK_ERROR: &str = "Transcription failed";

/// One timed, speaker-attributed utterance.
///
/// Used both for raw segments as reported by the worker and for merged
/// speaker turns; merging only coalesces records of this same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default = "default_speaker")]
    pub speaker: String,
}

fn default_speaker() -> String {
    UNKNOWN_SPEAKER.to_string()
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>, speaker: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            speaker: speaker.into(),
        }
    }

    /// Lenient construction from an untyped payload entry. Non-numeric or
    /// negative times collapse to 0, text is trimmed, and a missing or empty
    /// speaker becomes "Unknown".
    pub fn from_value(value: &Value) -> Self {
        let start = value
            .get("start")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .max(0.0);
        let end = value
            .get("end")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .max(0.0);
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let speaker = value
            .get("speaker")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SPEAKER)
            .to_string();
        Self {
            start,
            end,
            text,
            speaker,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Per-speaker rollup in the canonical result. `total_time` is a clock
/// string ("M:SS", or "H:MM:SS" from one hour up).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSummary {
    pub id: String,
    pub segment_count: u64,
    pub total_time: String,
}

/// Terminal record for one transcription task. Built once at process-exit
/// time and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub success: bool,
    pub file: String,
    pub model: String,
    pub device: String,
    pub language: String,
    pub duration: f64,
    pub segments: Vec<Segment>,
    pub raw_segment_count: usize,
    pub merged_segment_count: usize,
    pub speakers: Vec<SpeakerSummary>,
    pub transcription: String,
    pub has_diarization: bool,
    pub is_partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CanonicalResult {
    /// Failed result for a task. Guarantees a non-empty error message so
    /// `success == false` always carries a diagnostic.
    pub fn failure(request: &TaskRequest, error: impl Into<String>) -> Self {
        let message = error.into();
        let message = if message.trim().is_empty() {
            FALLBACK_ERROR.to_string()
        } else {
            message
        };
        Self {
            success: false,
            file: request.source_label.clone(),
            model: request.model.clone(),
            device: "unknown".to_string(),
            language: request.language.clone().unwrap_or_else(|| "auto".to_string()),
            duration: 0.0,
            segments: Vec::new(),
            raw_segment_count: 0,
            merged_segment_count: 0,
            speakers: Vec::new(),
            transcription: String::new(),
            has_diarization: request.diarization,
            is_partial: false,
            formatted_output: None,
            error: Some(message),
        }
    }
}

/// Event delivered to a task's observer. Exactly one of `complete`,
/// `partial`, or `error` terminates the stream; nothing follows it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Connected {
        task_id: String,
    },
    Progress {
        percent: f64,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
    Complete {
        result: CanonicalResult,
    },
    Partial {
        result: CanonicalResult,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Partial { .. } | ProgressEvent::Error { .. }
        )
    }
}

/// One parsed PROGRESS: line from the worker. The `stage` field is the
/// worker's pipeline phase ("converting", "transcription", "diarization").
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub message: String,
    #[serde(default)]
    pub stage: Option<String>,
}

/// Output format selector passed through to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Txt,
    Markdown,
}

impl OutputFormat {
    pub fn as_arg(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Txt => "txt",
            OutputFormat::Markdown => "markdown",
        }
    }
}

/// Options for one transcription job.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Unique id for the task; at most one live process per id at a time
    pub task_id: String,
    pub audio_path: PathBuf,
    /// Display label for the source audio (usually the file name)
    pub source_label: String,
    pub language: Option<String>,
    pub model: String,
    pub diarization: bool,
    pub output_format: OutputFormat,
}

impl TaskRequest {
    pub fn new(audio_path: PathBuf) -> Self {
        let source_label = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| audio_path.display().to_string());
        Self {
            task_id: Uuid::new_v4().to_string(),
            audio_path,
            source_label,
            language: None,
            model: DEFAULT_MODEL.to_string(),
            diarization: true,
            output_format: OutputFormat::Json,
        }
    }
}
