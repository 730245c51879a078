use async_trait::async_trait;
use pkg_constants::state::SERVICES_PREFIX;
use pkg_state::client::StateStore;
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::meta::NamespacedName;
use pkg_types::service::Service;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ServiceEventHandler, ServiceLister};

/// Local cache of Services keyed by `namespace/name`, kept by a [`ServiceInformer`].
#[derive(Clone, Default)]
pub struct ServiceCache {
    services: Arc<RwLock<HashMap<String, Service>>>,
}

#[async_trait]
impl ServiceLister for ServiceCache {
    async fn get(&self, name: &NamespacedName) -> anyhow::Result<Option<Service>> {
        Ok(self.services.read().await.get(&name.key()).cloned())
    }
}

/// Watches Services in the state store and fans add/update/delete
/// notifications out to registered handlers.
///
/// There is no periodic resync. The cache is relisted only at startup and
/// when the watch stream lags. A Service stored again unchanged is not
/// redelivered, so a relist only notifies about what actually differs.
pub struct ServiceInformer {
    store: StateStore,
    cache: ServiceCache,
    handlers: Vec<Arc<dyn ServiceEventHandler>>,
}

impl ServiceInformer {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            cache: ServiceCache::default(),
            handlers: Vec::new(),
        }
    }

    pub fn add_event_handler(&mut self, handler: Arc<dyn ServiceEventHandler>) {
        self.handlers.push(handler);
    }

    /// Lister backed by this informer's cache.
    pub fn lister(&self) -> ServiceCache {
        self.cache.clone()
    }

    /// Subscribe, deliver the current Services as adds, then keep watching
    /// in a background task. Returns once the initial list has been handled.
    pub async fn start(
        self,
        cancel: CancellationToken,
    ) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let mut events = self.store.event_log.subscribe();
        self.relist().await?;
        info!("Service informer synced");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = events.recv() => match result {
                        Ok(event) if event.key.starts_with(SERVICES_PREFIX) => {
                            self.handle_watch_event(event).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Service watch lagged by {} events, relisting", skipped);
                            if let Err(e) = self.relist().await {
                                warn!("Service informer relist error: {}", e);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            info!("Service informer stopped");
        }))
    }

    /// Bring the cache in line with the store, delivering only the differences.
    async fn relist(&self) -> anyhow::Result<()> {
        let entries = self.store.list_prefix(SERVICES_PREFIX).await?;
        let mut seen = HashSet::new();
        for (key, value) in entries {
            let service: Service = match serde_json::from_slice(&value) {
                Ok(s) => s,
                Err(e) => {
                    error!("Couldn't decode Service at {}: {}", key, e);
                    continue;
                }
            };
            seen.insert(service.namespaced_name().key());
            self.upsert(service).await;
        }

        let stale: Vec<Service> = {
            let mut services = self.cache.services.write().await;
            let gone: Vec<String> = services
                .keys()
                .filter(|k| !seen.contains(*k))
                .cloned()
                .collect();
            gone.iter().filter_map(|k| services.remove(k)).collect()
        };
        for service in stale {
            self.notify_delete(&service).await;
        }
        Ok(())
    }

    async fn handle_watch_event(&self, event: WatchEvent) {
        match event.event_type {
            EventType::Put => {
                let Some(value) = event.value else {
                    error!("Service put at {} carried no object", event.key);
                    return;
                };
                match serde_json::from_slice::<Service>(&value) {
                    Ok(service) => self.upsert(service).await,
                    Err(e) => error!("Couldn't decode Service at {}: {}", event.key, e),
                }
            }
            EventType::Delete => {
                let key = event.key.trim_start_matches(SERVICES_PREFIX);
                let removed = self.cache.services.write().await.remove(key);
                match removed {
                    Some(service) => self.notify_delete(&service).await,
                    None => error!("Couldn't get object for deleted Service key {}", key),
                }
            }
        }
    }

    async fn upsert(&self, service: Service) {
        let key = service.namespaced_name().key();
        let old = self
            .cache
            .services
            .write()
            .await
            .insert(key, service.clone());
        match old {
            Some(old) if old == service => {}
            Some(old) => {
                debug!("Service updated: {}/{}", service.namespace, service.name);
                for handler in &self.handlers {
                    handler.on_update(&old, &service).await;
                }
            }
            None => {
                debug!("Service added: {}/{}", service.namespace, service.name);
                for handler in &self.handlers {
                    handler.on_add(&service).await;
                }
            }
        }
    }

    async fn notify_delete(&self, service: &Service) {
        debug!("Service deleted: {}/{}", service.namespace, service.name);
        for handler in &self.handlers {
            handler.on_delete(service).await;
        }
    }
}
