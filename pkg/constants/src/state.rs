//! State store key layout.

/// Prefix under which Service objects are stored: `<prefix><namespace>/<name>`.
pub const SERVICES_PREFIX: &str = "/registry/services/";

/// Prefix under which recorded cluster events are stored:
/// `<prefix><namespace>/<uuid>`.
pub const EVENTS_PREFIX: &str = "/registry/events/";

/// Prefix of the southbound controller event table: `<prefix><id>`.
pub const CONTROLLER_EVENTS_PREFIX: &str = "/southbound/controller-events/";

/// Number of recent mutations retained by the in-memory watch log.
pub const EVENT_LOG_CAPACITY: usize = 4096;
