// engine/mod.rs
//
// External transcription engine capability. The engine is treated as an
// opaque, unreliable text emitter: start it, read its combined stdout
// incrementally, ask it to stop cooperatively, wait for its exit. Any
// backing implementation satisfies the same contract.

mod senko;

pub use senko::{SenkoConfig, SenkoEngine};

use anyhow::Result;
use async_trait::async_trait;

use crate::transcription::types::TaskRequest;

/// Exit information for one engine run.
#[derive(Debug, Clone)]
pub struct EngineExit {
    /// Process exit code, if the OS reported one
    pub code: Option<i32>,
    /// Collected diagnostic (stderr) output
    pub stderr: String,
}

impl EngineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running engine process for one task.
#[async_trait]
pub trait EngineProcess: Send {
    /// Next chunk of standard output, or `None` at end of stream. Chunk
    /// boundaries carry no meaning; lines may arrive split anywhere.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Cooperative interruption: ask the process to persist what it has
    /// and exit cleanly. Never force-kills.
    fn signal_stop(&mut self) -> Result<()>;

    /// Wait for natural exit and collect diagnostics.
    async fn wait(&mut self) -> Result<EngineExit>;
}

/// Factory spawning one engine process per task.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn start(&self, request: &TaskRequest) -> Result<Box<dyn EngineProcess>>;
}
