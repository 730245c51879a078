//! Idle status annotation schema and unidling timings.
//!
//! The annotation key and the three status literals are persisted on
//! Service objects and read by other controllers. Do not change them
//! without a migration.

/// Annotation holding the idle status of a Service.
pub const STATUS_ANNOTATION: &str = "k8s.ovn.org/idle-status";

/// Status value: the Service is idled.
pub const STATUS_IDLE: &str = "Idle";

/// Status value: the Service was unidled and is inside the grace period.
pub const STATUS_GRACE_PERIOD: &str = "GracePeriod";

/// Status value: the Service is fully active.
pub const STATUS_NOT_IDLE: &str = "NotIdle";

/// Any annotation key ending with this suffix marks a Service as idled.
pub const IDLED_AT_SUFFIX: &str = "idled-at";

/// Default grace period after unidling, in seconds.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Default timeout for a single control-plane call, in seconds.
pub const DEFAULT_EVENT_TIMEOUT_SECS: u64 = 10;

/// Reason attached to the wake-up event recorded against a Service.
pub const NEED_PODS_REASON: &str = "NeedPods";

/// `event_info` key carrying the VIP of an empty load balancer.
pub const EVENT_INFO_VIP: &str = "vip";

/// `event_info` key carrying the protocol of an empty load balancer.
pub const EVENT_INFO_PROTOCOL: &str = "protocol";
