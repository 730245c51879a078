//! Collaborator implementations backed by the [`StateStore`].

use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::state::{CONTROLLER_EVENTS_PREFIX, EVENTS_PREFIX, SERVICES_PREFIX};
use pkg_state::client::StateStore;
use pkg_state::watch::EventType;
use pkg_types::controller_event::ControllerEvent;
use pkg_types::event::{ClusterEvent, EventSeverity};
use pkg_types::meta::ObjectReference;
use pkg_types::service::Service;
use std::collections::HashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::{ControllerEventStore, EventRecorder, ServiceAnnotator};

/// Component name stamped on recorded events.
const EVENT_SOURCE: &str = "unidling-controller";

/// Read-modify-write rounds before an annotation update gives up.
const ANNOTATE_ATTEMPTS: usize = 5;

fn service_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", SERVICES_PREFIX, namespace, name)
}

/// Merges annotations into the stored Service object.
pub struct StoreServiceAnnotator {
    store: StateStore,
}

impl StoreServiceAnnotator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServiceAnnotator for StoreServiceAnnotator {
    async fn set_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let key = service_key(namespace, name);
        for attempt in 1..=ANNOTATE_ATTEMPTS {
            let data = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("service {}/{} not found", namespace, name))?;
            let mut service: Service = serde_json::from_slice(&data)?;

            let unchanged = annotations
                .iter()
                .all(|(k, v)| service.annotations.get(k) == Some(v));
            if unchanged {
                return Ok(());
            }

            service.annotations.extend(annotations.clone());
            let updated = serde_json::to_vec(&service)?;
            if self.store.compare_and_put(&key, &data, &updated).await? {
                return Ok(());
            }
            debug!(
                "Service {}/{} changed while annotating (attempt {}), retrying",
                namespace, name, attempt
            );
        }
        anyhow::bail!(
            "service {}/{} kept changing, gave up after {} attempts",
            namespace,
            name,
            ANNOTATE_ATTEMPTS
        )
    }
}

/// The southbound controller event table, one row per key under
/// `CONTROLLER_EVENTS_PREFIX`.
#[derive(Clone)]
pub struct StoreControllerEventStore {
    store: StateStore,
}

impl StoreControllerEventStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Insert a row. This is what the southbound side does when a packet
    /// hits a VIP without backends.
    pub async fn insert(&self, event: &ControllerEvent) -> anyhow::Result<()> {
        let key = format!("{}{}", CONTROLLER_EVENTS_PREFIX, event.id);
        self.store.put(&key, &serde_json::to_vec(event)?).await
    }

    async fn list_rows(store: &StateStore) -> anyhow::Result<Vec<ControllerEvent>> {
        let entries = store.list_prefix(CONTROLLER_EVENTS_PREFIX).await?;
        let mut events = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice(&value) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping undecodable controller event {}: {}", key, e),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl ControllerEventStore for StoreControllerEventStore {
    async fn list(&self) -> anyhow::Result<Vec<ControllerEvent>> {
        Self::list_rows(&self.store).await
    }

    async fn delete(&self, event: &ControllerEvent) -> anyhow::Result<()> {
        let key = format!("{}{}", CONTROLLER_EVENTS_PREFIX, event.id);
        self.store.delete(&key).await
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.store.clone();
        let mut watch = store.event_log.subscribe();

        tokio::spawn(async move {
            loop {
                match watch.recv().await {
                    Ok(event)
                        if event.event_type == EventType::Put
                            && event.key.starts_with(CONTROLLER_EVENTS_PREFIX) =>
                    {
                        let Some(value) = event.value else { continue };
                        match serde_json::from_slice::<ControllerEvent>(&value) {
                            Ok(row) if row.is_empty_lb_backends() => {
                                if tx.send(row).is_err() {
                                    return;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Skipping undecodable controller event {}: {}", event.key, e)
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Redeliver everything still pending; handling is idempotent.
                        warn!("Controller event watch lagged by {} events, relisting", skipped);
                        match Self::list_rows(&store).await {
                            Ok(rows) => {
                                for row in rows.into_iter().filter(ControllerEvent::is_empty_lb_backends) {
                                    if tx.send(row).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!("Controller event relist error: {}", e),
                        }
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        });

        rx
    }
}

/// Persists recorded events under `EVENTS_PREFIX`. Writes happen on a
/// spawned task so callers never wait on the store.
#[derive(Clone)]
pub struct StoreEventRecorder {
    store: StateStore,
}

impl StoreEventRecorder {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl EventRecorder for StoreEventRecorder {
    fn record(
        &self,
        target: &ObjectReference,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) {
        let event = ClusterEvent {
            id: uuid::Uuid::new_v4().to_string(),
            involved_object: target.clone(),
            severity,
            reason: reason.to_string(),
            message,
            source: EVENT_SOURCE.to_string(),
            created_at: Utc::now(),
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let key = format!(
                "{}{}/{}",
                EVENTS_PREFIX, event.involved_object.namespace, event.id
            );
            let result = match serde_json::to_vec(&event) {
                Ok(data) => store.put(&key, &data).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => debug!(
                    "Recorded {} event {} for {}/{}",
                    event.reason,
                    event.id,
                    event.involved_object.namespace,
                    event.involved_object.name
                ),
                Err(e) => warn!("Failed to record {} event: {}", event.reason, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::controller_event::ControllerEventType;
    use pkg_types::meta::NamespacedName;
    use pkg_types::service::{Protocol, ServicePort, ServiceSpec, ServiceType};
    use std::sync::Arc;
    use std::time::Duration;

    fn make_service() -> Service {
        Service {
            id: "svc-id".to_string(),
            name: "svc".to_string(),
            namespace: "ns".to_string(),
            spec: ServiceSpec {
                selector: HashMap::new(),
                ports: vec![ServicePort {
                    name: "http".to_string(),
                    port: 80,
                    target_port: 8080,
                    protocol: Protocol::Tcp,
                    node_port: None,
                }],
                service_type: ServiceType::ClusterIP,
            },
            cluster_ip: Some("10.0.0.5".to_string()),
            cluster_ips: vec![],
            annotations: HashMap::from([("owner".to_string(), "team-a".to_string())]),
            created_at: Utc::now(),
        }
    }

    fn controller_event(id: &str, event_type: ControllerEventType) -> ControllerEvent {
        ControllerEvent {
            id: id.to_string(),
            event_type,
            event_info: HashMap::from([("vip".to_string(), "10.0.0.5:80".to_string())]),
            chassis: None,
            seq_num: 1,
        }
    }

    #[tokio::test]
    async fn test_annotator_merges_and_skips_noop_writes() {
        let store = StateStore::in_memory().await.unwrap();
        store
            .put("/registry/services/ns/svc", &serde_json::to_vec(&make_service()).unwrap())
            .await
            .unwrap();
        let annotator = StoreServiceAnnotator::new(store.clone());
        let status = HashMap::from([(
            "k8s.ovn.org/idle-status".to_string(),
            "Idle".to_string(),
        )]);

        annotator.set_annotations("ns", "svc", status.clone()).await.unwrap();
        let seq = store.event_log.current_seq();
        annotator.set_annotations("ns", "svc", status).await.unwrap();
        assert_eq!(store.event_log.current_seq(), seq);

        let data = store.get("/registry/services/ns/svc").await.unwrap().unwrap();
        let stored: Service = serde_json::from_slice(&data).unwrap();
        assert_eq!(stored.annotations["k8s.ovn.org/idle-status"], "Idle");
        assert_eq!(stored.annotations["owner"], "team-a");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_annotator_never_restores_removed_marker() {
        let store = StateStore::in_memory().await.unwrap();
        let annotator = Arc::new(StoreServiceAnnotator::new(store.clone()));
        let key = "/registry/services/ns/svc";

        let mut idled = make_service();
        idled
            .annotations
            .insert("k8s.ovn.org/idled-at".to_string(), "2026-10-15T08:00:00Z".to_string());
        let mut woken = make_service();
        woken.annotations.insert("generation".to_string(), "woken".to_string());

        for _ in 0..200 {
            store.put(key, &serde_json::to_vec(&idled).unwrap()).await.unwrap();

            let a = annotator.clone();
            let status = tokio::spawn(async move {
                a.set_annotations(
                    "ns",
                    "svc",
                    HashMap::from([("k8s.ovn.org/idle-status".to_string(), "Idle".to_string())]),
                )
                .await
            });
            let s = store.clone();
            let body = serde_json::to_vec(&woken).unwrap();
            let unidle = tokio::spawn(async move { s.put(key, &body).await });
            status.await.unwrap().unwrap();
            unidle.await.unwrap().unwrap();

            let data = store.get(key).await.unwrap().unwrap();
            let stored: Service = serde_json::from_slice(&data).unwrap();
            assert!(!stored.annotations.contains_key("k8s.ovn.org/idled-at"));
            assert_eq!(stored.annotations["generation"], "woken");
        }
    }

    #[tokio::test]
    async fn test_annotator_missing_service() {
        let store = StateStore::in_memory().await.unwrap();
        let annotator = StoreServiceAnnotator::new(store);
        assert!(
            annotator
                .set_annotations("ns", "gone", HashMap::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_controller_event_table() {
        let store = StateStore::in_memory().await.unwrap();
        let table = StoreControllerEventStore::new(store);
        let mut live = table.subscribe();

        table
            .insert(&controller_event("skip", ControllerEventType::Other("x".to_string())))
            .await
            .unwrap();
        table
            .insert(&controller_event("e1", ControllerEventType::EmptyLbBackends))
            .await
            .unwrap();

        // Only EmptyLbBackends rows reach the live feed
        assert_eq!(live.recv().await.unwrap().id, "e1");
        assert_eq!(table.list().await.unwrap().len(), 2);

        let e1 = controller_event("e1", ControllerEventType::EmptyLbBackends);
        table.delete(&e1).await.unwrap();
        // Already gone
        table.delete(&e1).await.unwrap();
        assert_eq!(table.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recorder_persists_event() {
        let store = StateStore::in_memory().await.unwrap();
        let recorder = StoreEventRecorder::new(store.clone());
        recorder.record(
            &ObjectReference::service(&NamespacedName::new("ns", "svc")),
            EventSeverity::Normal,
            "NeedPods",
            "The service svc needs pods".to_string(),
        );

        let mut entries = Vec::new();
        for _ in 0..50 {
            entries = store.list_prefix("/registry/events/ns/").await.unwrap();
            if !entries.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(entries.len(), 1);
        let event: ClusterEvent = serde_json::from_slice(&entries[0].1).unwrap();
        assert_eq!(event.reason, "NeedPods");
        assert_eq!(event.involved_object.name, "svc");
        assert_eq!(event.source, "unidling-controller");
    }
}
