use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

/// Longest delay handed to the timer wheel, which rejects anything past
/// roughly two years. Longer requests are held for this long instead.
pub const MAX_GRACE_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Delay queue of Service keys (`namespace/name`) waiting for their grace
/// period to end.
///
/// A key is never delivered before its delay elapses, but may be delivered
/// later under load. Scheduling a key that is already pending yields two
/// deliveries: there is no cancellation, consumers re-check state instead.
#[derive(Debug, Clone)]
pub struct GracePeriodQueue {
    tx: mpsc::UnboundedSender<(String, Duration)>,
}

impl GracePeriodQueue {
    /// Spawn the timer task. Expired keys are sent on the returned receiver.
    ///
    /// The task stops once the receiver is dropped, or once every queue
    /// handle is dropped and nothing is left pending.
    pub fn start() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, requests) = mpsc::unbounded_channel();
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_timers(requests, expired_tx));
        (Self { tx }, expired_rx)
    }

    /// Deliver `key` once `after` has elapsed.
    pub fn schedule(&self, key: String, after: Duration) {
        debug!("Scheduling grace period end for {} in {:?}", key, after);
        if self.tx.send((key, after)).is_err() {
            warn!("Grace period timer is not running, dropping schedule request");
        }
    }
}

async fn run_timers(
    mut requests: mpsc::UnboundedReceiver<(String, Duration)>,
    expired: mpsc::UnboundedSender<String>,
) {
    let mut pending: DelayQueue<String> = DelayQueue::new();
    let mut accepting = true;

    loop {
        if !accepting && pending.is_empty() {
            return;
        }

        tokio::select! {
            request = requests.recv(), if accepting => match request {
                Some((key, after)) => {
                    if after > MAX_GRACE_DELAY {
                        warn!(
                            "Grace period of {:?} for {} is too long, capping at {:?}",
                            after, key, MAX_GRACE_DELAY
                        );
                    }
                    pending.insert(key, after.min(MAX_GRACE_DELAY));
                }
                None => accepting = false,
            },
            Some(entry) = std::future::poll_fn(|cx| pending.poll_expired(cx)), if !pending.is_empty() => {
                if expired.send(entry.into_inner()).is_err() {
                    return;
                }
            }
            _ = expired.closed() => return,
        }
    }
}
