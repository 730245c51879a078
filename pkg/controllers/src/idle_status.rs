use anyhow::Context;
use async_trait::async_trait;
use pkg_constants::unidling::{
    IDLED_AT_SUFFIX, STATUS_ANNOTATION, STATUS_GRACE_PERIOD, STATUS_IDLE, STATUS_NOT_IDLE,
};
use pkg_types::meta::NamespacedName;
use pkg_types::service::Service;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::{ServiceAnnotator, ServiceEventHandler, ServiceLister};
use crate::grace_period::GracePeriodQueue;

/// Idle status of a Service, as stored in the `k8s.ovn.org/idle-status`
/// annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStatus {
    Idle,
    GracePeriod,
    NotIdle,
}

impl IdleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleStatus::Idle => STATUS_IDLE,
            IdleStatus::GracePeriod => STATUS_GRACE_PERIOD,
            IdleStatus::NotIdle => STATUS_NOT_IDLE,
        }
    }
}

impl std::fmt::Display for IdleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdleStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            STATUS_IDLE => Ok(IdleStatus::Idle),
            STATUS_GRACE_PERIOD => Ok(IdleStatus::GracePeriod),
            STATUS_NOT_IDLE => Ok(IdleStatus::NotIdle),
            other => Err(anyhow::anyhow!("unknown idle status {:?}", other)),
        }
    }
}

/// Whether the Service carries an `*idled-at` annotation.
pub fn has_idled_at(service: &Service) -> bool {
    service
        .annotations
        .keys()
        .any(|key| key.ends_with(IDLED_AT_SUFFIX))
}

/// The stored status annotation. Absent and unrecognised values are `None`.
pub fn stored_status(service: &Service) -> Option<IdleStatus> {
    let raw = service.annotations.get(STATUS_ANNOTATION)?;
    match raw.parse() {
        Ok(status) => Some(status),
        Err(_) => {
            debug!(
                "Ignoring unrecognised {} value {:?} on service {}/{}",
                STATUS_ANNOTATION, raw, service.namespace, service.name
            );
            None
        }
    }
}

/// Idle status of a Service for use by other controllers.
/// A missing annotation means the Service is not idle.
pub fn get_idle_status(service: &Service) -> IdleStatus {
    stored_status(service).unwrap_or(IdleStatus::NotIdle)
}

/// Side effect to apply after observing a Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Write `Idle`.
    MarkIdle,
    /// Write `GracePeriod` and schedule the grace timer.
    EnterGracePeriod,
    /// Write `NotIdle`.
    MarkNotIdle,
}

/// Decide what to do after a watch event.
///
/// `prior` is the idle marker of the previously observed object, `None` when
/// the object was just created. `current` is the marker of the new object and
/// `stored` its status annotation.
pub fn decide_transition(
    prior: Option<bool>,
    current: bool,
    stored: Option<IdleStatus>,
) -> Transition {
    match (prior, current, stored) {
        (_, true, Some(IdleStatus::Idle)) => Transition::None,
        (_, true, _) => Transition::MarkIdle,
        (Some(true), false, Some(IdleStatus::Idle)) => Transition::EnterGracePeriod,
        (_, false, _) => Transition::None,
    }
}

/// Decide what to do when the grace timer of a still existing Service fires.
///
/// Only a Service that is still in `GracePeriod` and was not idled again
/// becomes `NotIdle`.
pub fn decide_grace_period_end(current: bool, stored: Option<IdleStatus>) -> Transition {
    match (current, stored) {
        (false, Some(IdleStatus::GracePeriod)) => Transition::MarkNotIdle,
        _ => Transition::None,
    }
}

/// Keeps the idle status annotation of every Service in step with its
/// `*idled-at` annotations.
///
/// Watch events are handled inline on the watch task. Grace period ends
/// arrive through the dispatcher and always re-read the Service from the
/// lister, so stale or duplicate timers are harmless.
pub struct IdleStatusController {
    annotator: Arc<dyn ServiceAnnotator>,
    lister: Arc<dyn ServiceLister>,
    grace_queue: GracePeriodQueue,
    grace_period: Duration,
}

impl IdleStatusController {
    pub fn new(
        annotator: Arc<dyn ServiceAnnotator>,
        lister: Arc<dyn ServiceLister>,
        grace_queue: GracePeriodQueue,
        grace_period: Duration,
    ) -> Self {
        Self {
            annotator,
            lister,
            grace_queue,
            grace_period,
        }
    }

    pub async fn on_service_add(&self, service: &Service) -> anyhow::Result<()> {
        let transition = decide_transition(None, has_idled_at(service), stored_status(service));
        self.apply(service, transition).await
    }

    pub async fn on_service_update(&self, old: &Service, new: &Service) -> anyhow::Result<()> {
        let transition = decide_transition(
            Some(has_idled_at(old)),
            has_idled_at(new),
            stored_status(new),
        );
        self.apply(new, transition).await
    }

    /// Finish the grace period of the Service behind `key` (`namespace/name`).
    pub async fn handle_grace_period_end(&self, key: &str) -> anyhow::Result<()> {
        let start = Instant::now();
        let name = NamespacedName::from_key(key)
            .with_context(|| format!("invalid grace period key {:?}", key))?;
        info!("Grace period finished for service {}", name);

        let Some(service) = self.lister.get(&name).await? else {
            // Deleted during the grace period
            debug!("Service {} no longer exists, dropping grace period end", name);
            return Ok(());
        };

        let transition = decide_grace_period_end(has_idled_at(&service), stored_status(&service));
        let result = self.apply(&service, transition).await;
        debug!(
            "Finished grace period end for service {} in {:?}",
            name,
            start.elapsed()
        );
        result
    }

    async fn apply(&self, service: &Service, transition: Transition) -> anyhow::Result<()> {
        match transition {
            Transition::None => Ok(()),
            Transition::MarkIdle => self.set_status(service, IdleStatus::Idle).await,
            Transition::MarkNotIdle => self.set_status(service, IdleStatus::NotIdle).await,
            Transition::EnterGracePeriod => {
                self.set_status(service, IdleStatus::GracePeriod).await?;
                self.grace_queue
                    .schedule(service.namespaced_name().key(), self.grace_period);
                Ok(())
            }
        }
    }

    async fn set_status(&self, service: &Service, status: IdleStatus) -> anyhow::Result<()> {
        info!(
            "Setting idle status of service {}/{} to {}",
            service.namespace, service.name, status
        );
        let annotations =
            HashMap::from([(STATUS_ANNOTATION.to_string(), status.as_str().to_string())]);
        self.annotator
            .set_annotations(&service.namespace, &service.name, annotations)
            .await
            .with_context(|| format!("can't set service idle status to [{}]", status))
    }
}

#[async_trait]
impl ServiceEventHandler for IdleStatusController {
    async fn on_add(&self, service: &Service) {
        if let Err(e) = self.on_service_add(service).await {
            warn!("IdleStatusController add {}/{}: {:#}", service.namespace, service.name, e);
        }
    }

    async fn on_update(&self, old: &Service, new: &Service) {
        if let Err(e) = self.on_service_update(old, new).await {
            warn!("IdleStatusController update {}/{}: {:#}", new.namespace, new.name, e);
        }
    }

    async fn on_delete(&self, _service: &Service) {
        // A pending grace timer finds the Service gone and drops itself.
    }
}
