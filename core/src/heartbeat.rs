// Liveness timer: periodic heartbeat broadcast and acknowledgement tracking
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use crate::bridge::Shared;
use crate::envelope::Envelope;
use crate::{BridgeError, Result};

/// Snapshot of the heartbeat exchange with the peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liveness {
    /// Heartbeats broadcast so far (also the last counter used)
    pub sent: u64,
    /// Highest counter a peer has echoed back
    pub last_acknowledged: Option<u64>,
    /// When that echo arrived, milliseconds since epoch
    pub last_acknowledged_at_ms: Option<i64>,
}

#[derive(Default)]
pub(crate) struct HeartbeatState {
    counter: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    ack: Mutex<Option<(u64, i64)>>,
}

impl HeartbeatState {
    pub(crate) fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn next_counter(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn acknowledge(&self, counter: u64) {
        let mut ack = self.ack.lock().unwrap_or_else(|e| e.into_inner());
        let newer = ack.map_or(true, |(last, _)| counter >= last);
        if newer {
            *ack = Some((counter, chrono::Utc::now().timestamp_millis()));
        }
    }

    pub(crate) fn snapshot(&self) -> Liveness {
        let ack = *self.ack.lock().unwrap_or_else(|e| e.into_inner());
        Liveness {
            sent: self.counter.load(Ordering::SeqCst),
            last_acknowledged: ack.map(|(c, _)| c),
            last_acknowledged_at_ms: ack.map(|(_, at)| at),
        }
    }
}

/// Starts the heartbeat cycle. The first heartbeat goes out one `interval`
/// after the call. Returns `Ok(false)` when a cycle is already running.
pub(crate) fn start(shared: &Arc<Shared>, interval: Duration) -> Result<bool> {
    if interval.is_zero() {
        return Err(BridgeError::Config(
            "heartbeat interval must be greater than 0".into(),
        ));
    }

    let mut task = shared
        .heartbeat
        .task
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if task.as_ref().is_some_and(|t| !t.is_finished()) {
        diag!(shared.config, "Heartbeat already running");
        return Ok(false);
    }

    let weak: Weak<Shared> = Arc::downgrade(shared);
    *task = Some(shared.runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else { break };
            if shared.is_destroyed() {
                break;
            }
            let counter = shared.heartbeat.next_counter();
            let beat = Envelope::heartbeat(
                shared.config.namespace.clone(),
                uuid::Uuid::new_v4().to_string(),
                counter,
            );
            match shared.broadcast(&beat) {
                Ok(delivered) => {
                    diag!(shared.config, counter, delivered, "Sent heartbeat");
                }
                Err(e) => shared.report(e),
            }
        }
    }));

    info!(
        target: "crosswin",
        namespace = %shared.config.namespace,
        interval_ms = interval.as_millis() as u64,
        "Started heartbeat"
    );
    Ok(true)
}

/// Cancels the heartbeat cycle. Returns `false` when none was running.
pub(crate) fn stop(shared: &Shared) -> bool {
    let task = shared
        .heartbeat
        .task
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
    match task {
        Some(task) => {
            let was_running = !task.is_finished();
            task.abort();
            if was_running {
                info!(target: "crosswin", namespace = %shared.config.namespace, "Stopped heartbeat");
            }
            was_running
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_keeps_the_highest_counter() {
        let state = HeartbeatState::default();
        state.acknowledge(3);
        state.acknowledge(2);
        let live = state.snapshot();
        assert_eq!(live.last_acknowledged, Some(3));
        assert!(live.last_acknowledged_at_ms.is_some());
    }

    #[test]
    fn counter_is_monotonic() {
        let state = HeartbeatState::default();
        assert_eq!(state.next_counter(), 1);
        assert_eq!(state.next_counter(), 2);
        assert_eq!(state.snapshot().sent, 2);
    }
}
