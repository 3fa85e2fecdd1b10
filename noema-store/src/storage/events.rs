//! Broadcast of mutation events to subscribers

use tokio::sync::broadcast;

use crate::storage::types::{EntityKind, MutationEvent, MutationOp};

/// Fan-out channel for `MutationEvent`s
///
/// Publishing never blocks. A subscriber that falls more than `capacity`
/// events behind receives `RecvError::Lagged` and skips ahead.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MutationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: MutationEvent) {
        tracing::trace!(
            entity_type = ?event.entity_type,
            entity_id = %event.entity_id,
            operation = ?event.operation,
            "Mutation event"
        );
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn emit(&self, entity_type: EntityKind, entity_id: impl ToString, operation: MutationOp) {
        self.publish(MutationEvent::new(entity_type, entity_id, operation));
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
