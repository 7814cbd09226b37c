use hlkit_core::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct HeartbeatStatus {
    pub last_ack: Instant,
    pub ping_count: u64,
    pub ack_count: u64,
}

/// Application-level liveness tracking: periodic pings, and a deadline on the last ack.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    ping_interval: Duration,
    timeout: Duration,
    last_ack: Mutex<Instant>,
    ping_count: AtomicU64,
    ack_count: AtomicU64,
}

impl HeartbeatMonitor {
    pub fn new(ping_interval: Duration, timeout: Duration) -> Self {
        Self {
            ping_interval,
            timeout,
            last_ack: Mutex::new(Instant::now()),
            ping_count: AtomicU64::new(0),
            ack_count: AtomicU64::new(0),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn record_ack(&self) {
        *self.last_ack.lock() = Instant::now();
        let count = self.ack_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Heartbeat ack recorded, count: {}", count);
    }

    /// Restarts the liveness window without counting an ack.
    pub fn reset(&self) {
        *self.last_ack.lock() = Instant::now();
    }

    pub fn last_ack(&self) -> Instant {
        *self.last_ack.lock()
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_ack()) > self.timeout
    }

    pub fn status(&self) -> HeartbeatStatus {
        HeartbeatStatus {
            last_ack: self.last_ack(),
            ping_count: self.ping_count.load(Ordering::Relaxed),
            ack_count: self.ack_count.load(Ordering::Relaxed),
        }
    }

    /// Spawns the ping loop. Each tick either sends a ping or, once the last ack is older
    /// than the timeout, calls `on_timeout` and stops.
    pub fn start<P, PFut, T, TFut>(self: &Arc<Self>, ping_sender: P, on_timeout: T) -> JoinHandle<()>
    where
        P: Fn() -> PFut + Send + Sync + 'static,
        PFut: Future<Output = Result<()>> + Send + 'static,
        T: FnOnce() -> TFut + Send + 'static,
        TFut: Future<Output = ()> + Send + 'static,
    {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + monitor.ping_interval, monitor.ping_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if monitor.is_stale(Instant::now()) {
                    warn!(
                        "No heartbeat ack for {:?}, forcing reconnect",
                        Instant::now().saturating_duration_since(monitor.last_ack())
                    );
                    on_timeout().await;
                    break;
                }

                match ping_sender().await {
                    Ok(()) => {
                        let count = monitor.ping_count.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!("Heartbeat ping sent, count: {}", count);
                    }
                    Err(e) => error!("Failed to send heartbeat ping: {}", e),
                }
            }
        })
    }
}
