use pkg_types::controller_event::ControllerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::BackendEmptyBridge;
use crate::idle_status::IdleStatusController;

/// Single consumer of backend-empty events and grace period expirations.
///
/// Items are taken without priority and handled one at a time, so no two
/// grace period ends ever run concurrently. On shutdown the item in flight
/// finishes and whatever is still queued is abandoned.
pub struct Dispatcher {
    bridge: Arc<BackendEmptyBridge>,
    idle_status: Arc<IdleStatusController>,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    expired: mpsc::UnboundedReceiver<String>,
}

impl Dispatcher {
    pub fn new(
        bridge: Arc<BackendEmptyBridge>,
        idle_status: Arc<IdleStatusController>,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
        expired: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            bridge,
            idle_status,
            events,
            expired,
        }
    }

    /// Start the dispatch loop as a background task.
    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Starting unidling dispatcher");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = self.events.recv() => {
                    if let Err(e) = self.bridge.handle_empty_lb_backends(&event).await {
                        warn!("Dropping controller event {}: {:#}", event.id, e);
                    }
                }
                Some(key) = self.expired.recv() => {
                    if let Err(e) = self.idle_status.handle_grace_period_end(&key).await {
                        warn!("Grace period end for {} failed: {:#}", key, e);
                    }
                }
                else => {
                    // Both inputs are gone; only shutdown is left to wait for.
                    cancel.cancelled().await;
                    break;
                }
            }
        }
        info!("Shut down unidling dispatcher");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ControllerEventStore, EventRecorder, ServiceAnnotator, ServiceLister};
    use crate::grace_period::GracePeriodQueue;
    use crate::vip_registry::{VipKey, VipRegistry};
    use async_trait::async_trait;
    use chrono::Utc;
    use pkg_types::controller_event::ControllerEventType;
    use pkg_types::event::EventSeverity;
    use pkg_types::meta::{NamespacedName, ObjectReference};
    use pkg_types::service::{Protocol, Service, ServiceSpec, ServiceType};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        deleted: Mutex<Vec<String>>,
        need_pods: Mutex<Vec<String>>,
        statuses: Mutex<Vec<(String, String)>>,
        services: Mutex<HashMap<NamespacedName, Service>>,
    }

    struct Fakes(Arc<Recorded>);

    #[async_trait]
    impl ControllerEventStore for Fakes {
        async fn list(&self) -> anyhow::Result<Vec<ControllerEvent>> {
            Ok(vec![])
        }

        async fn delete(&self, event: &ControllerEvent) -> anyhow::Result<()> {
            self.0.deleted.lock().unwrap().push(event.id.clone());
            Ok(())
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
            mpsc::unbounded_channel().1
        }
    }

    impl EventRecorder for Fakes {
        fn record(&self, target: &ObjectReference, _: EventSeverity, _: &str, _: String) {
            self.0
                .need_pods
                .lock()
                .unwrap()
                .push(format!("{}/{}", target.namespace, target.name));
        }
    }

    #[async_trait]
    impl ServiceAnnotator for Fakes {
        async fn set_annotations(
            &self,
            namespace: &str,
            name: &str,
            annotations: HashMap<String, String>,
        ) -> anyhow::Result<()> {
            for v in annotations.into_values() {
                self.0
                    .statuses
                    .lock()
                    .unwrap()
                    .push((format!("{}/{}", namespace, name), v));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ServiceLister for Fakes {
        async fn get(&self, name: &NamespacedName) -> anyhow::Result<Option<Service>> {
            Ok(self.0.services.lock().unwrap().get(name).cloned())
        }
    }

    fn grace_period_service() -> Service {
        Service {
            id: "svc-id".to_string(),
            name: "svc".to_string(),
            namespace: "ns".to_string(),
            spec: ServiceSpec {
                selector: HashMap::new(),
                ports: vec![],
                service_type: ServiceType::ClusterIP,
            },
            cluster_ip: Some("10.0.0.5".to_string()),
            cluster_ips: vec![],
            annotations: HashMap::from([(
                "k8s.ovn.org/idle-status".to_string(),
                "GracePeriod".to_string(),
            )]),
            created_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_both_inputs_until_cancelled() {
        let recorded = Arc::new(Recorded::default());
        recorded
            .services
            .lock()
            .unwrap()
            .insert(NamespacedName::new("ns", "svc"), grace_period_service());

        let registry = VipRegistry::new();
        registry.put(
            VipKey::new("10.0.0.5:80", Protocol::Udp),
            NamespacedName::new("ns", "svc"),
        );
        let bridge = Arc::new(BackendEmptyBridge::new(
            Arc::new(Fakes(recorded.clone())),
            registry,
            Arc::new(Fakes(recorded.clone())),
            Duration::from_secs(10),
        ));
        let (queue, expired) = GracePeriodQueue::start();
        let idle_status = Arc::new(IdleStatusController::new(
            Arc::new(Fakes(recorded.clone())),
            Arc::new(Fakes(recorded.clone())),
            queue.clone(),
            Duration::from_secs(30),
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = Dispatcher::new(bridge, idle_status, events_rx, expired).start(cancel.clone());

        events_tx
            .send(ControllerEvent {
                id: "e1".to_string(),
                event_type: ControllerEventType::EmptyLbBackends,
                event_info: HashMap::from([
                    ("vip".to_string(), "10.0.0.5:80".to_string()),
                    ("protocol".to_string(), "udp".to_string()),
                ]),
                chassis: None,
                seq_num: 1,
            })
            .unwrap();
        queue.schedule("ns/svc".to_string(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(*recorded.deleted.lock().unwrap(), vec!["e1"]);
        assert_eq!(*recorded.need_pods.lock().unwrap(), vec!["ns/svc"]);
        assert_eq!(
            *recorded.statuses.lock().unwrap(),
            vec![("ns/svc".to_string(), "NotIdle".to_string())]
        );

        cancel.cancel();
        handle.await.unwrap();

        // Nothing is consumed after shutdown
        let _ = events_tx.send(ControllerEvent {
            id: "late".to_string(),
            event_type: ControllerEventType::EmptyLbBackends,
            event_info: HashMap::new(),
            chassis: None,
            seq_num: 2,
        });
        assert_eq!(recorded.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_inputs_wait_for_shutdown() {
        let recorded = Arc::new(Recorded::default());
        let bridge = Arc::new(BackendEmptyBridge::new(
            Arc::new(Fakes(recorded.clone())),
            VipRegistry::new(),
            Arc::new(Fakes(recorded.clone())),
            Duration::from_secs(10),
        ));
        let (queue, _) = GracePeriodQueue::start();
        let idle_status = Arc::new(IdleStatusController::new(
            Arc::new(Fakes(recorded.clone())),
            Arc::new(Fakes(recorded.clone())),
            queue,
            Duration::from_secs(30),
        ));
        let (_, events_rx) = mpsc::unbounded_channel();
        let (_, expired_rx) = mpsc::unbounded_channel();

        let cancel = CancellationToken::new();
        let handle = Dispatcher::new(bridge, idle_status, events_rx, expired_rx).start(cancel.clone());
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }
}
