// supervisor.rs
//
// Task supervision: spawn the external engine, stream its output through
// the parser, forward progress events in order, and publish exactly one
// terminal event per task. No timeout is imposed; long jobs run to
// completion or explicit cooperative cancellation.

use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use crate::engine::{EngineExit, TranscriptionEngine};
use crate::error::TranscribeError;
use crate::progress::{ProgressHub, Subscription};
use crate::registry::TaskRegistry;
use crate::transcription::merge::MergePolicy;
use crate::transcription::normalize::{normalize_result, PARSE_FAILURE_MESSAGE, PROCESS_FAILURE_MESSAGE};
use crate::transcription::parser::OutputParser;
use crate::transcription::types::{CanonicalResult, ProgressEvent, ProgressUpdate, TaskRequest, FALLBACK_ERROR};

/// Coordinator owning the engine, the live-task registry, and the progress
/// hub. One instance serves any number of concurrent tasks.
pub struct TranscriptionService {
    engine: Arc<dyn TranscriptionEngine>,
    registry: Arc<TaskRegistry>,
    hub: Arc<ProgressHub>,
    policy: MergePolicy,
}

impl TranscriptionService {
    pub fn new(engine: Arc<dyn TranscriptionEngine>) -> Self {
        Self::with_policy(engine, MergePolicy::default())
    }

    pub fn with_policy(engine: Arc<dyn TranscriptionEngine>, policy: MergePolicy) -> Self {
        Self {
            engine,
            registry: Arc::new(TaskRegistry::new()),
            hub: Arc::new(ProgressHub::new()),
            policy,
        }
    }

    /// Attach an observer to a task's event stream.
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        Arc::clone(&self.hub).subscribe(task_id)
    }

    /// Request cooperative interruption of a running task. The worker gets
    /// a chance to persist partial results; nothing is force-killed.
    pub fn request_stop(&self, task_id: &str) -> Result<(), TranscribeError> {
        if self.registry.request_stop(task_id) {
            info!("Task {}: stop requested", task_id);
            Ok(())
        } else {
            Err(TranscribeError::TaskNotFound(task_id.to_string()))
        }
    }

    /// Run one transcription task to completion.
    ///
    /// The returned result is handed back for persistence regardless of
    /// whether an observer was attached; the observer (if any) sees the
    /// same outcome as the terminal event. Spawn failure produces a failed
    /// result and an immediate `error` event; there is no retry.
    pub async fn start_task(&self, request: TaskRequest) -> Result<CanonicalResult, TranscribeError> {
        let task_id = request.task_id.clone();
        if self.registry.is_active(&task_id) {
            return Err(TranscribeError::TaskAlreadyRunning(task_id));
        }

        let mut process = match self.engine.start(&request).await {
            Ok(process) => process,
            Err(e) => {
                let message = format!("Failed to start transcription process: {}", e);
                warn!("Task {}: {}", task_id, message);
                self.hub.publish(
                    &task_id,
                    ProgressEvent::Error {
                        message: message.clone(),
                    },
                );
                return Ok(CanonicalResult::failure(&request, message));
            }
        };

        let cancel = self.registry.register(&task_id);
        info!("Task {}: worker started for {}", task_id, request.source_label);

        let mut parser = OutputParser::new();
        let mut stop_sent = false;

        loop {
            let stop_requested = tokio::select! {
                biased;
                _ = cancel.cancelled(), if !stop_sent => true,
                chunk = process.read_chunk() => {
                    match chunk {
                        Ok(Some(bytes)) => {
                            for update in parser.push(&bytes) {
                                self.forward_progress(&task_id, update);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Task {}: worker output read failed: {}", task_id, e);
                            break;
                        }
                    }
                    false
                }
            };
            if stop_requested {
                stop_sent = true;
                info!("Task {}: forwarding stop signal to worker", task_id);
                if let Err(e) = process.signal_stop() {
                    warn!("Task {}: stop signal failed: {}", task_id, e);
                }
            }
        }

        // Deregister before waiting so a late stop request reports not-found
        self.registry.remove(&task_id);

        let exit = process.wait().await;
        let (trailing, payload) = parser.finish();
        for update in trailing {
            self.forward_progress(&task_id, update);
        }

        let result = self.build_result(payload.as_ref(), &request, exit);
        self.publish_terminal(&task_id, &result);
        info!(
            "Task {}: finished (success={}, partial={})",
            task_id, result.success, result.is_partial
        );
        Ok(result)
    }

    /// Classify the outcome when normalization found nothing: a zero exit
    /// with no payload is a parse failure, anything else surfaces the
    /// worker's diagnostic stream.
    fn build_result(
        &self,
        payload: Option<&Value>,
        request: &TaskRequest,
        exit: anyhow::Result<EngineExit>,
    ) -> CanonicalResult {
        let exit = exit.unwrap_or_else(|e| EngineExit {
            code: None,
            stderr: e.to_string(),
        });
        match normalize_result(payload, request, &self.policy) {
            Some(result) => result,
            None if exit.success() => CanonicalResult::failure(request, PARSE_FAILURE_MESSAGE),
            None => {
                let diagnostic = exit.stderr.trim();
                let message = if diagnostic.is_empty() {
                    PROCESS_FAILURE_MESSAGE.to_string()
                } else {
                    diagnostic.to_string()
                };
                CanonicalResult::failure(request, message)
            }
        }
    }

    fn forward_progress(&self, task_id: &str, update: ProgressUpdate) {
        self.hub.publish(
            task_id,
            ProgressEvent::Progress {
                percent: update.percent,
                message: update.message,
                stage: update.stage,
            },
        );
    }

    fn publish_terminal(&self, task_id: &str, result: &CanonicalResult) {
        let event = if !result.success {
            ProgressEvent::Error {
                message: result
                    .error
                    .clone()
                    .unwrap_or_else(|| FALLBACK_ERROR.to_string()),
            }
        } else if result.is_partial {
            ProgressEvent::Partial {
                result: result.clone(),
            }
        } else {
            ProgressEvent::Complete {
                result: result.clone(),
            }
        };
        self.hub.publish(task_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineProcess;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn request(id: &str) -> TaskRequest {
        let mut request = TaskRequest::new(PathBuf::from("/tmp/upload/meeting.m4a"));
        request.task_id = id.to_string();
        request
    }

    /// Engine replaying a fixed stdout transcript.
    struct ScriptedEngine {
        chunks: Vec<Vec<u8>>,
        code: Option<i32>,
        stderr: String,
    }

    impl ScriptedEngine {
        fn new(chunks: &[&[u8]], code: Option<i32>, stderr: &str) -> Arc<Self> {
            Arc::new(Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                code,
                stderr: stderr.to_string(),
            })
        }
    }

    #[async_trait]
    impl TranscriptionEngine for ScriptedEngine {
        async fn start(&self, _request: &TaskRequest) -> Result<Box<dyn EngineProcess>> {
            Ok(Box::new(ScriptedProcess {
                chunks: self.chunks.clone().into(),
                code: self.code,
                stderr: self.stderr.clone(),
            }))
        }
    }

    struct ScriptedProcess {
        chunks: VecDeque<Vec<u8>>,
        code: Option<i32>,
        stderr: String,
    }

    #[async_trait]
    impl EngineProcess for ScriptedProcess {
        async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.chunks.pop_front())
        }
        fn signal_stop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn wait(&mut self) -> Result<EngineExit> {
            Ok(EngineExit {
                code: self.code,
                stderr: self.stderr.clone(),
            })
        }
    }

    /// Engine whose process emits a partial result only after the stop
    /// signal arrives, like the real worker's interrupt handler.
    struct StopAwareEngine {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TranscriptionEngine for StopAwareEngine {
        async fn start(&self, _request: &TaskRequest) -> Result<Box<dyn EngineProcess>> {
            Ok(Box::new(StopAwareProcess {
                notify: Arc::new(Notify::new()),
                stopped: self.stopped.clone(),
                drained: false,
            }))
        }
    }

    struct StopAwareProcess {
        notify: Arc<Notify>,
        stopped: Arc<AtomicBool>,
        drained: bool,
    }

    #[async_trait]
    impl EngineProcess for StopAwareProcess {
        async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            if self.drained {
                return Ok(None);
            }
            self.notify.notified().await;
            self.drained = true;
            Ok(Some(
                b"RESULT:{\"success\":true,\"is_partial\":true,\"segments\":[]}\n".to_vec(),
            ))
        }
        fn signal_stop(&mut self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            self.notify.notify_one();
            Ok(())
        }
        async fn wait(&mut self) -> Result<EngineExit> {
            Ok(EngineExit {
                code: Some(0),
                stderr: String::new(),
            })
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl TranscriptionEngine for FailingEngine {
        async fn start(&self, _request: &TaskRequest) -> Result<Box<dyn EngineProcess>> {
            Err(anyhow!("No such file or directory"))
        }
    }

    fn drain(subscription: &mut Subscription) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = subscription.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_stream_scenario_progress_then_complete() {
        // Line split across chunk boundaries on purpose
        let engine = ScriptedEngine::new(
            &[
                b"loading...\nPROGRESS:{\"percent\":50,\"mes",
                b"sage\":\"halfway\"}\nRESULT:{\"success\":true,\"segments\":[]}\n",
            ],
            Some(0),
            "",
        );
        let service = TranscriptionService::new(engine);
        let mut subscription = service.subscribe("t1");

        let result = service.start_task(request("t1")).await.unwrap();
        assert!(result.success);
        assert!(!result.is_partial);
        assert!(result.segments.is_empty());

        let events = drain(&mut subscription);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ProgressEvent::Connected { .. }));
        assert!(
            matches!(&events[1], ProgressEvent::Progress { percent, message, .. }
                if *percent == 50.0 && message == "halfway")
        );
        assert!(matches!(&events[2], ProgressEvent::Complete { result } if result.success));
    }

    #[tokio::test]
    async fn test_result_returned_without_observer() {
        let engine = ScriptedEngine::new(&[b"RESULT:{\"success\":true,\"segments\":[]}\n"], Some(0), "");
        let service = TranscriptionService::new(engine);
        let result = service.start_task(request("t1")).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_no_payload_zero_exit_is_parse_failure() {
        let engine = ScriptedEngine::new(&[b"just some chatter, no json\n"], Some(0), "");
        let service = TranscriptionService::new(engine);
        let mut subscription = service.subscribe("t1");

        let result = service.start_task(request("t1")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(PARSE_FAILURE_MESSAGE));

        let events = drain(&mut subscription);
        assert!(matches!(&events[1], ProgressEvent::Error { message } if message == PARSE_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let engine = ScriptedEngine::new(&[], Some(1), "Traceback: boom\n");
        let service = TranscriptionService::new(engine);
        let result = service.start_task(request("t1")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Traceback: boom"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_empty_stderr_gets_fixed_message() {
        let engine = ScriptedEngine::new(&[], Some(2), "");
        let service = TranscriptionService::new(engine);
        let result = service.start_task(request("t1")).await.unwrap();
        assert_eq!(result.error.as_deref(), Some(PROCESS_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_worker_reported_failure_passes_through() {
        let engine = ScriptedEngine::new(
            &[b"RESULT:{\"type\":\"error\",\"message\":\"Audio file not found\"}\n"],
            Some(1),
            "ignored stderr",
        );
        let service = TranscriptionService::new(engine);
        let result = service.start_task(request("t1")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Audio file not found"));
    }

    #[tokio::test]
    async fn test_spawn_failure_emits_error_and_failed_result() {
        let service = TranscriptionService::new(Arc::new(FailingEngine));
        let mut subscription = service.subscribe("t1");

        let result = service.start_task(request("t1")).await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("No such file"));

        let events = drain(&mut subscription);
        assert!(matches!(&events[1], ProgressEvent::Error { .. }));
        assert!(service.request_stop("t1").is_err(), "nothing was registered");
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_not_found() {
        let engine = ScriptedEngine::new(&[], Some(0), "");
        let service = TranscriptionService::new(engine);
        assert!(matches!(
            service.request_stop("ghost"),
            Err(TranscribeError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cooperative_stop_yields_partial_result() {
        let stopped = Arc::new(AtomicBool::new(false));
        let service = Arc::new(TranscriptionService::new(Arc::new(StopAwareEngine {
            stopped: stopped.clone(),
        })));
        let mut subscription = service.subscribe("t1");

        let runner = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.start_task(request("t1")).await })
        };

        // Let the task register before stopping it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        service.request_stop("t1").expect("task is live");

        let result = runner.await.unwrap().unwrap();
        assert!(result.success);
        assert!(result.is_partial);
        assert!(stopped.load(Ordering::SeqCst), "stop signal reached the worker");

        let events = drain(&mut subscription);
        assert!(matches!(events.last(), Some(ProgressEvent::Partial { .. })));

        // The registration is gone, so a second stop reports not-found
        assert!(matches!(
            service.request_stop("t1"),
            Err(TranscribeError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_task_id_rejected_while_running() {
        let service = Arc::new(TranscriptionService::new(Arc::new(StopAwareEngine {
            stopped: Arc::new(AtomicBool::new(false)),
        })));

        let runner = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.start_task(request("t1")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(
            service.start_task(request("t1")).await,
            Err(TranscribeError::TaskAlreadyRunning(_))
        ));

        service.request_stop("t1").expect("task is live");
        runner.await.unwrap().unwrap();
    }
}
