// progress.rs
//
// Per-task progress delivery. One observer per task id; events published
// while nobody is attached are dropped, not queued. This is a live progress
// stream, not a durable log.

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::transcription::types::ProgressEvent;

#[derive(Default)]
pub struct ProgressHub {
    observers: DashMap<String, UnboundedSender<ProgressEvent>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer to a task id, replacing any previous one. A
    /// `connected` event is queued immediately; dropping the subscription
    /// detaches it.
    pub fn subscribe(self: Arc<Self>, task_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(ProgressEvent::Connected {
            task_id: task_id.to_string(),
        });
        self.observers.insert(task_id.to_string(), sender.clone());
        Subscription {
            hub: self,
            task_id: task_id.to_string(),
            sender,
            receiver,
        }
    }

    /// Deliver an event to the task's current observer, if any. Best-effort,
    /// at-most-once.
    pub fn publish(&self, task_id: &str, event: ProgressEvent) {
        if let Some(observer) = self.observers.get(task_id) {
            if observer.send(event).is_err() {
                debug!("Observer for task {} went away, dropping event", task_id);
            }
        }
    }

    pub fn has_observer(&self, task_id: &str) -> bool {
        self.observers.contains_key(task_id)
    }
}

/// Handle to one task's event stream. Dropping it deregisters the observer,
/// unless a newer subscription has already replaced it.
pub struct Subscription {
    hub: Arc<ProgressHub>,
    task_id: String,
    sender: UnboundedSender<ProgressEvent>,
    receiver: UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub
            .observers
            .remove_if(&self.task_id, |_, current| current.same_channel(&self.sender));
    }
}
