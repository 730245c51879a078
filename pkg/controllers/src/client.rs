//! Collaborator interfaces the unidling controllers are built against.
//!
//! The controllers never talk to the state store or the southbound database
//! directly. The daemon wires in the implementations from [`crate::store`]
//! and [`crate::informer`]; tests wire in fakes.

use anyhow::Result;
use async_trait::async_trait;
use pkg_types::controller_event::ControllerEvent;
use pkg_types::event::EventSeverity;
use pkg_types::meta::{NamespacedName, ObjectReference};
use pkg_types::service::Service;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Read access to the current cached state of Services.
#[async_trait]
pub trait ServiceLister: Send + Sync {
    /// Current Service for `name`, or `None` if it does not exist.
    async fn get(&self, name: &NamespacedName) -> Result<Option<Service>>;
}

/// Writes annotations onto a Service.
///
/// Setting a key to the value it already holds must be a no-op.
#[async_trait]
pub trait ServiceAnnotator: Send + Sync {
    async fn set_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: HashMap<String, String>,
    ) -> Result<()>;
}

/// The southbound controller event table.
#[async_trait]
pub trait ControllerEventStore: Send + Sync {
    /// All events currently pending in the table.
    async fn list(&self) -> Result<Vec<ControllerEvent>>;

    /// Acknowledge an event by deleting its row. Deleting a row that is
    /// already gone is not an error.
    async fn delete(&self, event: &ControllerEvent) -> Result<()>;

    /// Live feed of newly inserted `EmptyLbBackends` events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent>;
}

/// Fire-and-forget sink for cluster events.
pub trait EventRecorder: Send + Sync {
    fn record(
        &self,
        target: &ObjectReference,
        severity: EventSeverity,
        reason: &str,
        message: String,
    );
}

/// Receives Service add/update/delete notifications from a watch.
///
/// Handlers run on the watch task and must return promptly.
#[async_trait]
pub trait ServiceEventHandler: Send + Sync {
    async fn on_add(&self, service: &Service);

    async fn on_update(&self, old: &Service, new: &Service);

    async fn on_delete(&self, service: &Service);
}
