// engine/senko.rs
//
// Production engine: the mlx-whisper + senko Python worker, spawned one
// process per task with streaming progress enabled. The worker installs
// SIGINT/SIGTERM handlers that flush a partial result before exiting, so
// the stop signal stays cooperative.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::{EngineExit, EngineProcess, TranscriptionEngine};
use crate::transcription::types::TaskRequest;

/// Configuration for the Python worker engine.
#[derive(Debug, Clone)]
pub struct SenkoConfig {
    /// Path to the transcription worker script
    pub script_path: PathBuf,
    /// Interpreter override; discovered via `which` when unset
    pub python_path: Option<PathBuf>,
}

impl SenkoConfig {
    pub fn new(script_path: PathBuf) -> Self {
        Self {
            script_path,
            python_path: None,
        }
    }
}

pub struct SenkoEngine {
    config: SenkoConfig,
}

impl SenkoEngine {
    pub fn new(config: SenkoConfig) -> Self {
        Self { config }
    }

    fn resolve_interpreter(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.config.python_path {
            return Ok(path.clone());
        }
        which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|e| anyhow!("No Python interpreter found: {}", e))
    }
}

#[async_trait]
impl TranscriptionEngine for SenkoEngine {
    async fn start(&self, request: &TaskRequest) -> Result<Box<dyn EngineProcess>> {
        let interpreter = self.resolve_interpreter()?;

        let mut cmd = Command::new(&interpreter);
        cmd.arg(&self.config.script_path)
            .arg(&request.audio_path)
            .arg("--model")
            .arg(&request.model)
            .arg("--format")
            .arg(request.output_format.as_arg())
            .arg("--stream")
            .arg("--quiet");
        if let Some(ref language) = request.language {
            cmd.arg("--language").arg(language);
        }
        if !request.diarization {
            cmd.arg("--no-diarize");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            "Task {}: spawning worker {} {}",
            request.task_id,
            interpreter.display(),
            self.config.script_path.display()
        );

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", interpreter.display()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Worker stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Worker stderr not captured"))?;

        // Drain stderr concurrently so the worker never blocks on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_string(&mut collected).await;
            collected
        });

        Ok(Box::new(SenkoProcess {
            child,
            stdout: Some(stdout),
            stderr_task: Some(stderr_task),
            stop_sent: false,
        }))
    }
}

struct SenkoProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    stop_sent: bool,
}

#[async_trait]
impl EngineProcess for SenkoProcess {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buffer = [0u8; 4096];
        let read = stdout
            .read(&mut buffer)
            .await
            .context("Failed to read worker stdout")?;
        if read == 0 {
            self.stdout = None;
            return Ok(None);
        }
        Ok(Some(buffer[..read].to_vec()))
    }

    fn signal_stop(&mut self) -> Result<()> {
        if self.stop_sent {
            return Ok(());
        }
        self.stop_sent = true;

        #[cfg(unix)]
        {
            let pid = self
                .child
                .id()
                .ok_or_else(|| anyhow!("Worker already exited"))?;
            debug!("Sending SIGTERM to worker pid {}", pid);
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(anyhow!(
                    "kill({}) failed: {}",
                    pid,
                    std::io::Error::last_os_error()
                ));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            // No cooperative signal on this platform
            self.child
                .start_kill()
                .context("Failed to terminate worker")
        }
    }

    async fn wait(&mut self) -> Result<EngineExit> {
        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for worker exit")?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        debug!("Worker exited with {:?}", status.code());
        Ok(EngineExit {
            code: status.code(),
            stderr,
        })
    }
}
