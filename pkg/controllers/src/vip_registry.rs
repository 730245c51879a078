use async_trait::async_trait;
use dashmap::DashMap;
use pkg_types::meta::NamespacedName;
use pkg_types::service::{Protocol, Service};
use std::sync::Arc;
use tracing::debug;

use crate::client::ServiceEventHandler;

/// Load balancer VIP as seen by the southbound database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VipKey {
    /// `ip:port`, IPv6 hosts bracketed.
    pub vip: String,
    pub protocol: Protocol,
}

impl VipKey {
    pub fn new(vip: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            vip: vip.into(),
            protocol,
        }
    }
}

/// Maps load balancer VIPs to the Service that owns them.
///
/// This is a cache fed by the Service watch, not a source of truth: a miss
/// only means a wake-up event is not sent. Each operation locks a single
/// shard for its own duration only.
#[derive(Debug, Clone, Default)]
pub struct VipRegistry {
    entries: Arc<DashMap<VipKey, NamespacedName>>,
}

impl VipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: VipKey, service: NamespacedName) {
        self.entries.insert(key, service);
    }

    pub fn get(&self, key: &VipKey) -> Option<NamespacedName> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, key: &VipKey) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register every VIP of `service`. Services without a cluster IP have none.
    pub fn add_service(&self, service: &Service) {
        let owner = service.namespaced_name();
        for (vip, protocol) in service.vips() {
            debug!("VIP {} ({}) -> service {}", vip, protocol, owner);
            self.put(VipKey::new(vip, protocol), owner.clone());
        }
    }

    /// Forget every VIP derived from `service`.
    pub fn remove_service(&self, service: &Service) {
        for (vip, protocol) in service.vips() {
            self.delete(&VipKey::new(vip, protocol));
        }
    }
}

#[async_trait]
impl ServiceEventHandler for VipRegistry {
    async fn on_add(&self, service: &Service) {
        self.add_service(service);
    }

    async fn on_update(&self, old: &Service, new: &Service) {
        self.remove_service(old);
        self.add_service(new);
    }

    async fn on_delete(&self, service: &Service) {
        self.remove_service(service);
    }
}
