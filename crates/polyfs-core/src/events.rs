//! The service event bus.
//!
//! Multicast broadcast channels with send-order delivery. Post-operation
//! events are sent after the underlying provider call completes and
//! before the operation returns to the caller; no threads are involved
//! in delivery.

use polyfs_types::{
    CapabilityChangeEvent, FileChange, FileError, OperationEvent, RegistrationEvent,
};
use tokio::sync::broadcast;

pub struct EventBus {
    registrations: broadcast::Sender<RegistrationEvent>,
    capabilities: broadcast::Sender<CapabilityChangeEvent>,
    operations: broadcast::Sender<OperationEvent>,
    changes: broadcast::Sender<Vec<FileChange>>,
    errors: broadcast::Sender<FileError>,
}

impl EventBus {
    pub fn new() -> Self {
        let (registrations, _) = broadcast::channel(64);
        let (capabilities, _) = broadcast::channel(64);
        let (operations, _) = broadcast::channel(256);
        let (changes, _) = broadcast::channel(256);
        let (errors, _) = broadcast::channel(64);
        Self {
            registrations,
            capabilities,
            operations,
            changes,
            errors,
        }
    }

    pub fn emit_registration(&self, event: RegistrationEvent) {
        let _ = self.registrations.send(event);
    }

    pub fn emit_capability_change(&self, event: CapabilityChangeEvent) {
        let _ = self.capabilities.send(event);
    }

    pub fn emit_operation(&self, event: OperationEvent) {
        let _ = self.operations.send(event);
    }

    pub fn emit_changes(&self, changes: Vec<FileChange>) {
        let _ = self.changes.send(changes);
    }

    pub fn emit_error(&self, error: FileError) {
        let _ = self.errors.send(error);
    }

    pub fn subscribe_registrations(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.registrations.subscribe()
    }

    pub fn subscribe_capability_changes(&self) -> broadcast::Receiver<CapabilityChangeEvent> {
        self.capabilities.subscribe()
    }

    pub fn subscribe_operations(&self) -> broadcast::Receiver<OperationEvent> {
        self.operations.subscribe()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<Vec<FileChange>> {
        self.changes.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<FileError> {
        self.errors.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
