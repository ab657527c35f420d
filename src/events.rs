//! Job lifecycle events for notification consumers and UI polling.
//!
//! All events go out on a bounded broadcast channel; a slow subscriber may
//! miss progress updates. Terminal events (`Completed`, `Failed`) are also
//! pushed to every registered notification channel, which is unbounded, so
//! those are delivered for as long as the receiver is alive.

use crate::types::JobKind;
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum JobEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        job_id: Uuid,
        config_id: Uuid,
        kind: JobKind,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: Uuid,
        progress: u8,
        operation: String,
    },
    #[serde(rename_all = "camelCase")]
    Warning { job_id: Uuid, message: String },
    #[serde(rename_all = "camelCase")]
    Completed {
        job_id: Uuid,
        config_id: Uuid,
        kind: JobKind,
        file_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: Uuid,
        config_id: Uuid,
        kind: JobKind,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Warning { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
    notifiers: Mutex<Vec<mpsc::UnboundedSender<JobEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            notifiers: Mutex::new(Vec::new()),
        }
    }

    /// Receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Receiver for terminal events only, never lagging.
    pub fn notifications(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notifiers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    pub fn publish(&self, event: JobEvent) {
        if event.is_terminal() {
            let mut notifiers = self
                .notifiers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            notifiers.retain(|tx| tx.send(event.clone()).is_ok());
        }
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
