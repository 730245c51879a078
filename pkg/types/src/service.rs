use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::meta::NamespacedName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
            ServiceType::ExternalName => write!(f, "ExternalName"),
        }
    }
}

/// L4 protocol of a Service port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Sctp => write!(f, "SCTP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub node_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub selector: HashMap<String, String>,
    pub ports: Vec<ServicePort>,
    pub service_type: ServiceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub spec: ServiceSpec,
    /// Primary cluster IP. `None` or `"None"` (headless) means unset.
    #[serde(default)]
    pub cluster_ip: Option<String>,
    /// All cluster IPs for dual-stack Services; the first equals `cluster_ip`.
    #[serde(default)]
    pub cluster_ips: Vec<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Whether the Service has an allocated, non-headless cluster IP.
    pub fn has_cluster_ip(&self) -> bool {
        if self.spec.service_type == ServiceType::ExternalName {
            return false;
        }
        matches!(self.cluster_ip.as_deref(), Some(ip) if !ip.is_empty() && ip != "None")
    }

    /// Cluster IPs of the Service, falling back to `cluster_ip` when
    /// `cluster_ips` is not populated.
    pub fn all_cluster_ips(&self) -> Vec<&str> {
        if !self.has_cluster_ip() {
            return Vec::new();
        }
        if self.cluster_ips.is_empty() {
            return self.cluster_ip.as_deref().into_iter().collect();
        }
        self.cluster_ips
            .iter()
            .map(String::as_str)
            .filter(|ip| !ip.is_empty() && *ip != "None")
            .collect()
    }

    /// Every `(ip:port, protocol)` pair this Service answers on.
    pub fn vips(&self) -> Vec<(String, Protocol)> {
        let mut vips = Vec::new();
        for ip in self.all_cluster_ips() {
            for port in &self.spec.ports {
                vips.push((join_host_port(ip, port.port), port.protocol));
            }
        }
        vips
    }
}

/// Join a host and port into `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
