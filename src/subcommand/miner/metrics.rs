use super::*;

/// Window over which the aggregate hashrate in [`Metrics::hash_rate`] and
/// [`Metrics::status_line`] is computed.
const ROLLING_WINDOW: Duration = Duration::from_secs(5);

/// How often [`Metrics::recommend`] re-evaluates the thread/intensity rules.
pub(crate) const RECOMMENDATION_PERIOD: Duration = Duration::from_secs(30);

/// How often CPU/resident-memory is sampled from the OS (§4.6 Sampling).
pub(crate) const TELEMETRY_SAMPLE_PERIOD: Duration = Duration::from_millis(500);

/// A non-binding suggestion from the controller's rule-based tuner (§4.6).
/// The coordinator only logs this; acting on it is left to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recommendation {
    IncreaseThreads,
    DecreaseThreads,
    Unchanged,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recommendation::IncreaseThreads => "increase threads by 1",
            Recommendation::DecreaseThreads => "decrease threads by 1",
            Recommendation::Unchanged => "no change",
        })
    }
}

/// The most recent error surfaced by any part of the session, kept for the
/// status snapshot so operators can diagnose without attaching a debugger.
#[derive(Debug, Clone)]
pub(crate) struct LastError {
    pub kind: &'static str,
    pub message: String,
    pub at: Instant,
}

/// Rolling and cumulative telemetry shared between hashers (writers) and the
/// coordinator/controller (readers). All fields are independent atomics; no
/// worker reads another worker's state (§3 Ownership).
pub(crate) struct Metrics {
    total: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    lost: AtomicU64,
    rate_limited: AtomicU64,
    reconnects: AtomicU64,
    started: Instant,
    window_start: Mutex<(Instant, u64)>,
    high_cpu_windows: AtomicU64,
    efficiency_ewma: Mutex<Option<f64>>,
    last_error: std::sync::Mutex<Option<LastError>>,
    /// Last `cpu_percent`/resident-memory-MB sample (§3 telemetry sample,
    /// §4.6 sampling), stored as bit-cast `f64`s so they can be read without
    /// an async lock from the status line.
    last_cpu_percent_bits: AtomicU64,
    last_memory_mb: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            started: Instant::now(),
            window_start: Mutex::new((Instant::now(), 0)),
            high_cpu_windows: AtomicU64::new(0),
            efficiency_ewma: Mutex::new(None),
            last_error: std::sync::Mutex::new(None),
            last_cpu_percent_bits: AtomicU64::new(0.0f64.to_bits()),
            last_memory_mb: AtomicU64::new(0),
        }
    }

    /// Records the most recent CPU/resident-memory sample for the status
    /// snapshot (§3 Telemetry sample).
    pub fn record_resource_sample(&self, cpu_percent: f64, memory_mb: u64) {
        self.last_cpu_percent_bits
            .store(cpu_percent.to_bits(), Ordering::Relaxed);
        self.last_memory_mb.store(memory_mb, Ordering::Relaxed);
    }

    /// The CPU percentage from the most recent [`Metrics::record_resource_sample`].
    pub fn last_cpu_percent(&self) -> f64 {
        f64::from_bits(self.last_cpu_percent_bits.load(Ordering::Relaxed))
    }

    /// Records the most recent error kind/message for the status snapshot.
    /// Overwrites any previous entry; only the latest error is kept (§7).
    pub fn record_error(&self, kind: &'static str, message: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(LastError {
            kind,
            message: message.into(),
            at: Instant::now(),
        });
    }

    pub fn add(&self, hashes: u64) {
        self.total.fetch_add(hashes, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fraction of resolved submissions (accepted+rejected+stale) that were
    /// rejected, used by the §4.6 recommendation rules. Returns 0 until any
    /// submission has resolved.
    fn rejection_rate(&self) -> f64 {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let resolved = accepted + rejected;
        if resolved == 0 {
            0.0
        } else {
            rejected as f64 / resolved as f64
        }
    }

    /// Current aggregate hashrate, averaged since the last call to this
    /// method (a rolling window tolerant of up to one sample period of lag,
    /// per §5 ordering guarantees).
    pub async fn hash_rate(&self) -> HashRate {
        let mut guard = self.window_start.lock().await;
        let (prev_time, prev_total) = *guard;

        let now = Instant::now();
        let total = self.total();

        let dt = now.duration_since(prev_time).as_secs_f64().max(1e-6);
        let rate = total.saturating_sub(prev_total) as f64 / dt;

        if now.duration_since(prev_time) >= ROLLING_WINDOW {
            *guard = (now, total);
        }

        HashRate(rate)
    }

    /// Evaluates the three §4.6 rules against current CPU/rejection/efficiency
    /// readings and returns a recommendation. Never acted on automatically.
    pub async fn recommend(&self, cpu_percent: f64, hash_rate: HashRate) -> Recommendation {
        const EWMA_ALPHA: f64 = 0.3;

        let efficiency = hash_rate.0 / (cpu_percent + f64::EPSILON);

        let trending_up = {
            let mut guard = self.efficiency_ewma.lock().await;
            let prev = *guard;
            let next = match prev {
                Some(prev) => EWMA_ALPHA * efficiency + (1.0 - EWMA_ALPHA) * prev,
                None => efficiency,
            };
            *guard = Some(next);
            prev.is_some_and(|prev| next > prev)
        };

        let rejection_rate = self.rejection_rate();

        if cpu_percent > 95.0 && rejection_rate > 0.05 {
            let consecutive = self.high_cpu_windows.fetch_add(1, Ordering::Relaxed) + 1;
            if consecutive >= 2 {
                return Recommendation::DecreaseThreads;
            }
            return Recommendation::Unchanged;
        }
        self.high_cpu_windows.store(0, Ordering::Relaxed);

        if cpu_percent < 70.0 && rejection_rate < 0.01 && trending_up {
            return Recommendation::IncreaseThreads;
        }

        Recommendation::Unchanged
    }
}

impl StatusLine for Metrics {
    fn status_line(&self) -> String {
        let mut line = format!(
            "hashrate={} accepted={} rejected={} stale={} reconnects={} uptime={:.1}s cpu={:.1}% mem={}MB",
            HashRate(self.total() as f64 / self.uptime().as_secs_f64().max(1e-6)),
            self.accepted.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.stale.load(Ordering::Relaxed),
            self.reconnects(),
            self.uptime().as_secs_f64(),
            f64::from_bits(self.last_cpu_percent_bits.load(Ordering::Relaxed)),
            self.last_memory_mb.load(Ordering::Relaxed),
        );

        if let Some(last_error) = self.last_error.lock().unwrap().as_ref() {
            line.push_str(&format!(
                " last_error={}: {} ({:.0}s ago)",
                last_error.kind,
                last_error.message,
                last_error.at.elapsed().as_secs_f64()
            ));
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_accumulates() {
        let metrics = Metrics::new();
        metrics.add(100);
        metrics.add(50);
        assert_eq!(metrics.total(), 150);
    }

    #[test]
    fn counters_are_independent() {
        let metrics = Metrics::new();
        metrics.record_accepted();
        metrics.record_accepted();
        metrics.record_rejected();
        metrics.record_stale();
        assert_eq!(metrics.accepted.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.rejected.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.stale.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn rejection_rate_ignores_stale() {
        let metrics = Metrics::new();
        metrics.record_accepted();
        metrics.record_rejected();
        metrics.record_stale();
        assert_eq!(metrics.rejection_rate(), 0.5);
    }

    #[test]
    fn status_line_omits_last_error_until_one_is_recorded() {
        let metrics = Metrics::new();
        assert!(!metrics.status_line().contains("last_error"));

        metrics.record_error("network", "connection reset");
        let line = metrics.status_line();
        assert!(line.contains("last_error=network: connection reset"));
    }

    #[test]
    fn record_error_keeps_only_the_latest() {
        let metrics = Metrics::new();
        metrics.record_error("network", "first");
        metrics.record_error("protocol", "second");
        let line = metrics.status_line();
        assert!(line.contains("last_error=protocol: second"));
        assert!(!line.contains("first"));
    }

    #[tokio::test]
    async fn low_cpu_low_rejection_rising_efficiency_recommends_increase() {
        let metrics = Metrics::new();
        metrics.record_accepted();
        let _ = metrics.recommend(50.0, HashRate(100.0)).await;
        let rec = metrics.recommend(50.0, HashRate(200.0)).await;
        assert_eq!(rec, Recommendation::IncreaseThreads);
    }

    #[tokio::test]
    async fn high_cpu_needs_two_consecutive_windows() {
        let metrics = Metrics::new();
        metrics.record_accepted();
        metrics.record_rejected();
        metrics.record_rejected();
        let first = metrics.recommend(99.0, HashRate(100.0)).await;
        assert_eq!(first, Recommendation::Unchanged);
        let second = metrics.recommend(99.0, HashRate(100.0)).await;
        assert_eq!(second, Recommendation::DecreaseThreads);
    }

    #[test]
    fn resource_sample_is_reflected_in_status_line() {
        let metrics = Metrics::new();
        metrics.record_resource_sample(42.5, 128);
        assert_eq!(metrics.last_cpu_percent(), 42.5);
        let line = metrics.status_line();
        assert!(line.contains("cpu=42.5%"));
        assert!(line.contains("mem=128MB"));
    }

    #[tokio::test]
    async fn reconnect_count_is_tracked() {
        let metrics = Metrics::new();
        metrics.record_reconnect();
        metrics.record_reconnect();
        assert_eq!(metrics.reconnects(), 2);
    }
}
