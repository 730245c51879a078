//! Service unidling controllers.
//!
//! Two independent halves share one [`dispatcher::Dispatcher`]:
//! the backend-empty bridge turns southbound "no backends" events into
//! `NeedPods` events against the owning Service, and the idle status
//! controller keeps the `k8s.ovn.org/idle-status` annotation in step with
//! the `*idled-at` annotations set by whoever idled the Service.

pub mod bridge;
pub mod client;
pub mod dispatcher;
pub mod grace_period;
pub mod idle_status;
pub mod informer;
pub mod store;
pub mod vip_registry;
