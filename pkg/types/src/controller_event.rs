use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type of a southbound controller event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerEventType {
    /// A load balancer VIP with no backends received a packet.
    #[serde(rename = "empty_lb_backends")]
    EmptyLbBackends,
    #[serde(untagged)]
    Other(String),
}

/// A row of the control-plane `Controller_Event` table.
///
/// `event_info` carries at least `vip` ("ip:port") and optionally
/// `protocol` ("tcp", "udp", "sctp").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub id: String,
    pub event_type: ControllerEventType,
    #[serde(default)]
    pub event_info: HashMap<String, String>,
    #[serde(default)]
    pub chassis: Option<String>,
    #[serde(default)]
    pub seq_num: u64,
}

impl ControllerEvent {
    pub fn is_empty_lb_backends(&self) -> bool {
        self.event_type == ControllerEventType::EmptyLbBackends
    }
}
