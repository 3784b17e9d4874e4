use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock-free traffic counters
#[derive(Debug, Default)]
pub struct Stats {
    pub bytes_received: AtomicU64,
    pub events_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub events_sent: AtomicU64,
    pub unhandled_events: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Stats::default())
    }

    #[inline(always)]
    pub fn record_recv(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_sent(&self, bytes: usize) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_unhandled(&self) {
        self.unhandled_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset counters, return rates
    pub fn snapshot_and_reset(&self, elapsed: Duration) -> StatsSnapshot {
        let secs = elapsed.as_secs_f64().max(0.001);

        let rx_bytes = self.bytes_received.swap(0, Ordering::Relaxed);
        let rx_events = self.events_received.swap(0, Ordering::Relaxed);
        let tx_bytes = self.bytes_sent.swap(0, Ordering::Relaxed);
        let tx_events = self.events_sent.swap(0, Ordering::Relaxed);
        let unhandled = self.unhandled_events.swap(0, Ordering::Relaxed);

        StatsSnapshot {
            rx_eps: (rx_events as f64) / secs,
            rx_kbps: ((rx_bytes as f64) * 8.0) / (secs * 1_000.0),
            tx_eps: (tx_events as f64) / secs,
            tx_kbps: ((tx_bytes as f64) * 8.0) / (secs * 1_000.0),
            unhandled_events: unhandled,
        }
    }
}

#[derive(Debug)]
pub struct StatsSnapshot {
    pub rx_eps: f64,
    pub rx_kbps: f64,
    pub tx_eps: f64,
    pub tx_kbps: f64,
    pub unhandled_events: u64,
}

/// Background stats reporter loop; run on its own thread.
pub fn stats_reporter(stats: Arc<Stats>, interval_secs: u64, running: Arc<AtomicBool>) {
    if interval_secs == 0 {
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    let mut last = Instant::now();

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(interval);
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let snap = stats.snapshot_and_reset(elapsed);
        println!(
            "[STATS] rx: {:.0} evt/s, {:.1} kbps | tx: {:.0} evt/s, {:.1} kbps | unhandled: {}",
            snap.rx_eps, snap.rx_kbps, snap.tx_eps, snap.tx_kbps, snap.unhandled_events
        );
    }
}
