//! Event Broadcaster (§4.9): fans out queue-status, progress, and
//! notification events to connected clients, throttling progress updates and
//! driving the Bypass Gateway's first-connect/all-disconnect hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// [SUPPLEMENT] Grounded on `websocket_manager.py` / `env.py`: the constant
/// actually wired into the running app's environment defaults, not the
/// package-internal copy that reads `1` in one retrieved snapshot.
pub const DOWNLOAD_PROGRESS_UPDATE_INTERVAL: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    QueueStatus { tasks: serde_json::Value },
    Progress { task_id: String, progress: f64 },
    Notification { level: NotificationLevel, message: String },
}

struct ThrottleState {
    last_broadcast_pct: f64,
    last_broadcast_at: Instant,
}

/// Invoked off the calling task (spawned, not awaited inline) so a slow
/// warmup never blocks the connection handshake.
pub type ConnectHook = Arc<dyn Fn() + Send + Sync>;

pub struct Broadcaster {
    tx: broadcast::Sender<Event>,
    connected: AtomicUsize,
    throttle: Mutex<HashMap<String, ThrottleState>>,
    on_first_connect: Mutex<Option<ConnectHook>>,
    on_all_disconnect: Mutex<Option<ConnectHook>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            connected: AtomicUsize::new(0),
            throttle: Mutex::new(HashMap::new()),
            on_first_connect: Mutex::new(None),
            on_all_disconnect: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub async fn set_first_connect_hook(&self, hook: ConnectHook) {
        *self.on_first_connect.lock().await = Some(hook);
    }

    pub async fn set_all_disconnect_hook(&self, hook: ConnectHook) {
        *self.on_all_disconnect.lock().await = Some(hook);
    }

    /// A client connected. Returns the new connection count.
    pub async fn on_connect(&self) -> usize {
        let prev = self.connected.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            if let Some(hook) = self.on_first_connect.lock().await.clone() {
                tokio::spawn(async move { hook() });
            }
        }
        prev + 1
    }

    /// A client disconnected. Returns the new connection count.
    pub async fn on_disconnect(&self) -> usize {
        let prev = self.connected.load(Ordering::SeqCst);
        let new = if prev == 0 { 0 } else { self.connected.fetch_sub(1, Ordering::SeqCst) - 1 };
        if prev != 0 && new == 0 {
            if let Some(hook) = self.on_all_disconnect.lock().await.clone() {
                tokio::spawn(async move { hook() });
            }
        }
        new
    }

    pub fn connection_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        let _ = self.tx.send(Event::Notification { level, message: message.into() });
    }

    pub fn queue_status(&self, tasks: serde_json::Value) {
        let _ = self.tx.send(Event::QueueStatus { tasks });
    }

    /// Applies the throttling rule (§4.9) and broadcasts if the progress
    /// update clears it. The queue itself is always updated by the caller
    /// regardless of whether this broadcasts.
    pub async fn progress(&self, task_id: &str, pct: f64) {
        let should_send = {
            let mut throttle = self.throttle.lock().await;
            match throttle.get_mut(task_id) {
                None => {
                    throttle.insert(
                        task_id.to_string(),
                        ThrottleState { last_broadcast_pct: pct, last_broadcast_at: Instant::now() },
                    );
                    true
                }
                Some(state) => {
                    let jumped = (pct - state.last_broadcast_pct).abs() >= 10.0;
                    let stale = state.last_broadcast_at.elapsed()
                        >= Duration::from_secs(DOWNLOAD_PROGRESS_UPDATE_INTERVAL);
                    let edge = pct <= 1.0 || pct >= 99.0;
                    let send = edge || jumped || stale;
                    if send {
                        state.last_broadcast_pct = pct;
                        state.last_broadcast_at = Instant::now();
                    }
                    send
                }
            }
        };
        if should_send {
            debug!(task_id, pct, "broadcasting progress");
            let _ = self.tx.send(Event::Progress { task_id: task_id.to_string(), progress: pct });
        }
    }

    /// Drops a task's throttle state, e.g. once it reaches a terminal status.
    pub async fn forget(&self, task_id: &str) {
        self.throttle.lock().await.remove(task_id);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_progress_update_always_broadcasts() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.progress("t1", 0.5).await;
        let evt = rx.try_recv().expect("should have broadcast");
        matches!(evt, Event::Progress { .. });
    }

    #[tokio::test]
    async fn mid_range_small_delta_is_throttled() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.progress("t1", 50.0).await;
        rx.try_recv().unwrap();
        b.progress("t1", 52.0).await;
        assert!(rx.try_recv().is_err(), "small delta within interval should not broadcast");
    }

    #[tokio::test]
    async fn large_jump_forces_broadcast() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.progress("t1", 20.0).await;
        rx.try_recv().unwrap();
        b.progress("t1", 35.0).await;
        assert!(rx.try_recv().is_ok(), ">=10pt jump should broadcast");
    }

    #[tokio::test]
    async fn completion_edge_always_broadcasts() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.progress("t1", 50.0).await;
        rx.try_recv().unwrap();
        b.progress("t1", 99.5).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn first_connect_hook_fires_only_on_zero_to_one_transition() {
        let b = Arc::new(Broadcaster::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        b.set_first_connect_hook(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        assert_eq!(b.on_connect().await, 1);
        assert_eq!(b.on_connect().await, 2);
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_disconnect_hook_fires_only_on_n_to_zero_transition() {
        let b = Arc::new(Broadcaster::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        b.set_all_disconnect_hook(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        b.on_connect().await;
        b.on_connect().await;
        assert_eq!(b.on_disconnect().await, 1);
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(b.on_disconnect().await, 0);
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
