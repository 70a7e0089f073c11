use serde::{Deserialize, Serialize};

use crate::types::{NodeStatus, RunId, RunStatus};

/// Progress notifications emitted while a workflow runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        levels: usize,
    },
    NodeStarted {
        run_id: RunId,
        node_id: String,
    },
    NodeFinished {
        run_id: RunId,
        node_id: String,
        status: NodeStatus,
        duration_ms: u64,
    },
    NodeSkipped {
        run_id: RunId,
        node_id: String,
        status: NodeStatus,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        elapsed_ms: u64,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::NodeStarted {
            run_id: RunId("r1".into()),
            node_id: "gen".into(),
        });
        match rx.recv().await.unwrap() {
            RunEvent::NodeStarted { node_id, .. } => assert_eq!(node_id, "gen"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(RunEvent::RunStarted {
            run_id: RunId::new(),
            levels: 3,
        });
    }
}
