use anyhow::Context;
use pkg_constants::unidling::{EVENT_INFO_PROTOCOL, EVENT_INFO_VIP, NEED_PODS_REASON};
use pkg_types::controller_event::ControllerEvent;
use pkg_types::event::EventSeverity;
use pkg_types::meta::ObjectReference;
use pkg_types::service::Protocol;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ControllerEventStore, EventRecorder};
use crate::vip_registry::{VipKey, VipRegistry};

/// Turns southbound "load balancer has no backends" events into `NeedPods`
/// events against the Service owning the VIP.
///
/// Every event is acknowledged by deleting it before anything else. A failed
/// delete drops the event: the southbound side emits a new one on the next
/// packet to the VIP.
pub struct BackendEmptyBridge {
    events: Arc<dyn ControllerEventStore>,
    registry: VipRegistry,
    recorder: Arc<dyn EventRecorder>,
    timeout: Duration,
}

impl BackendEmptyBridge {
    pub fn new(
        events: Arc<dyn ControllerEventStore>,
        registry: VipRegistry,
        recorder: Arc<dyn EventRecorder>,
        timeout: Duration,
    ) -> Self {
        Self {
            events,
            registry,
            recorder,
            timeout,
        }
    }

    /// Attach to the live event feed, then queue the events that were
    /// already pending.
    ///
    /// Subscribing first means nothing emitted in between is lost; an event
    /// that shows up in both is handled twice, which only costs a redundant
    /// delete and wake-up.
    pub async fn start_feed(&self) -> anyhow::Result<mpsc::UnboundedReceiver<ControllerEvent>> {
        info!("Registering southbound controller event handler");
        let mut live = self.events.subscribe();

        info!("Populating initial controller events");
        let pending = tokio::time::timeout(self.timeout, self.events.list())
            .await
            .map_err(|_| {
                anyhow::anyhow!("listing controller events timed out after {:?}", self.timeout)
            })?
            .context("failed to list controller events")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut queued = 0usize;
        for event in pending.into_iter().filter(ControllerEvent::is_empty_lb_backends) {
            queued += 1;
            let _ = tx.send(event);
        }
        debug!("Queued {} pending controller events", queued);

        tokio::spawn(async move {
            while let Some(event) = live.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    pub async fn handle_empty_lb_backends(&self, event: &ControllerEvent) -> anyhow::Result<()> {
        tokio::time::timeout(self.timeout, self.events.delete(event))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "deleting controller event {} timed out after {:?}",
                    event.id,
                    self.timeout
                )
            })?
            .with_context(|| format!("failed to delete controller event {}", event.id))?;

        let Some(vip) = event.event_info.get(EVENT_INFO_VIP) else {
            warn!(
                "Controller event {} has no {} in its info, ignoring",
                event.id, EVENT_INFO_VIP
            );
            return Ok(());
        };
        let protocol = parse_protocol(event.event_info.get(EVENT_INFO_PROTOCOL).map(String::as_str));

        let Some(service) = self.registry.get(&VipKey::new(vip.clone(), protocol)) else {
            debug!("No service owns VIP {} ({}), nothing to wake", vip, protocol);
            return Ok(());
        };

        debug!(
            "Sending a {} event for service {} in namespace {}",
            NEED_PODS_REASON, service.name, service.namespace
        );
        self.recorder.record(
            &ObjectReference::service(&service),
            EventSeverity::Normal,
            NEED_PODS_REASON,
            format!("The service {} needs pods", service.name),
        );
        Ok(())
    }
}

/// Protocol of a controller event: `udp` and `sctp` in any case, TCP otherwise.
pub fn parse_protocol(raw: Option<&str>) -> Protocol {
    match raw {
        Some(p) if p.eq_ignore_ascii_case("udp") => Protocol::Udp,
        Some(p) if p.eq_ignore_ascii_case("sctp") => Protocol::Sctp,
        _ => Protocol::Tcp,
    }
}
