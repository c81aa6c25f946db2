// Transcribe-Local - supervision layer for external transcription workers
//
// This crate covers three tightly coupled jobs:
// - Supervise one externally-spawned transcription process per task,
//   including cooperative cancellation with partial-result salvage
// - Incrementally parse the worker's mixed stream of log noise, progress
//   marker lines, and a terminal JSON result embedded in free text
// - Merge diarized segments into speaker turns and build the canonical
//   transcript record
//
// HTTP transport, upload handling, and on-disk persistence are collaborators
// around this core, not part of it.

pub mod engine;
pub mod error;
pub mod progress;
pub mod registry;
pub mod supervisor;
pub mod transcription;

pub use error::TranscribeError;
pub use progress::Subscription;
pub use supervisor::TranscriptionService;
pub use transcription::merge::MergePolicy;
pub use transcription::types::{
    CanonicalResult, OutputFormat, ProgressEvent, Segment, SpeakerSummary, TaskRequest,
};
