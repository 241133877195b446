use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::MonitorConfig;
use crate::models::{Site, SiteStatus, Snapshot};
use crate::prober::Prober;
use crate::store::SnapshotStore;

/// Owns the site list and the published snapshot, and drives probe cycles.
pub struct Monitor {
    sites: Arc<[Site]>,
    config: MonitorConfig,
    prober: Prober,
    store: SnapshotStore,
    cycle_lock: Mutex<()>,
    started_at: Instant,
}

impl Monitor {
    /// Builds an idle monitor whose snapshot holds placeholders.
    pub fn new(sites: Vec<Site>, config: MonitorConfig) -> Result<Self, reqwest::Error> {
        let prober = Prober::new(config.request_timeout)?;
        let now = Utc::now();
        let placeholders = sites
            .iter()
            .map(|site| SiteStatus::placeholder(site, now))
            .collect();

        Ok(Self {
            sites: sites.into(),
            config,
            prober,
            store: SnapshotStore::new(placeholders),
            cycle_lock: Mutex::new(()),
            started_at: Instant::now(),
        })
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.store.current().await
    }

    pub fn cycles(&self) -> u64 {
        self.store.cycles()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Runs one full cycle and publishes it. Returns the published snapshot.
    ///
    /// Cycles are serialized, so an earlier cycle never overwrites a later one.
    pub async fn check_all_sites(&self) -> Arc<Snapshot> {
        let _cycle = self.cycle_lock.lock().await;
        let start = Instant::now();
        let statuses = self.prober.run_cycle(&self.sites).await;
        let up = statuses.iter().filter(|s| s.is_up).count();

        let published = self.store.publish(statuses).await;

        info!(
            sites = self.sites.len(),
            up,
            down = self.sites.len() - up,
            "Check cycle completed in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        published
    }

    /// Resolves once at least `cycle` cycles have been published.
    pub async fn wait_for_cycle(&self, cycle: u64) {
        let mut rx = self.store.subscribe();
        rx.wait_for(|count| *count >= cycle).await.ok();
    }

    /// Scheduling loop: one cycle right away, then one per interval tick.
    ///
    /// Cancellation is checked at every wait point. A cycle that has already
    /// started runs to completion before the loop exits.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            sites = self.sites.len(),
            interval_secs = self.config.check_interval.as_secs(),
            timeout_secs = self.config.request_timeout.as_secs(),
            "Site monitor started"
        );

        if shutdown.is_cancelled() {
            info!("Monitoring stopped before the first cycle");
            return;
        }
        self.check_all_sites().await;

        let mut ticker = time::interval_at(
            time::Instant::now() + self.config.check_interval,
            self.config.check_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Monitoring stopped (cancelled)");
                    return;
                }
                _ = ticker.tick() => {
                    info!("Starting scheduled check cycle at {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
                    self.check_all_sites().await;
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_site(id: &str) -> Site {
        Site {
            id: id.into(),
            name: id.to_uppercase(),
            url: "http://127.0.0.1:9/".into(),
        }
    }

    fn quick_config(interval: Duration) -> MonitorConfig {
        MonitorConfig {
            check_interval: interval,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn new_monitor_serves_placeholders() {
        let monitor = Monitor::new(
            vec![unreachable_site("a"), unreachable_site("b")],
            MonitorConfig::default(),
        )
        .unwrap();

        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|s| !s.is_up && s.is_placeholder()));
        assert_eq!(snapshot[0].site.id, "a");
        assert_eq!(snapshot[1].site.id, "b");
        assert_eq!(monitor.cycles(), 0);
    }

    #[tokio::test]
    async fn check_all_sites_replaces_placeholders() {
        let monitor = Monitor::new(vec![unreachable_site("a")], quick_config(Duration::from_secs(60)))
            .unwrap();

        let published = monitor.check_all_sites().await;

        assert_eq!(monitor.cycles(), 1);
        assert_eq!(published.len(), 1);
        assert!(!published[0].is_placeholder());
        assert_eq!(published[0].status_code, 0);
        assert!(!published[0].error.is_empty());
    }

    #[tokio::test]
    async fn overlapping_cycles_each_return_their_own_snapshot() {
        let monitor = Arc::new(
            Monitor::new(vec![unreachable_site("a")], quick_config(Duration::from_secs(60)))
                .unwrap(),
        );

        let (first, second) = tokio::join!(monitor.check_all_sites(), monitor.check_all_sites());

        assert_eq!(monitor.cycles(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        let current = monitor.snapshot().await;
        assert!(Arc::ptr_eq(&current, &first) || Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_no_cycle() {
        let monitor = Arc::new(Monitor::new(vec![], MonitorConfig::default()).unwrap());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        Arc::clone(&monitor).run(shutdown).await;
        assert_eq!(monitor.cycles(), 0);
    }

    #[tokio::test]
    async fn cancellation_preempts_long_interval() {
        let monitor = Arc::new(
            Monitor::new(vec![], quick_config(Duration::from_secs(3600))).unwrap(),
        );
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&monitor).spawn(shutdown.clone());

        monitor.wait_for_cycle(1).await;
        shutdown.cancel();

        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
        assert_eq!(monitor.cycles(), 1);
    }

    #[tokio::test]
    async fn ticks_drive_repeated_cycles() {
        let monitor = Arc::new(
            Monitor::new(vec![], quick_config(Duration::from_millis(20))).unwrap(),
        );
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&monitor).spawn(shutdown.clone());

        time::timeout(Duration::from_secs(5), monitor.wait_for_cycle(3))
            .await
            .expect("cycles did not repeat");
        shutdown.cancel();
        handle.await.unwrap();

        let stopped_at = monitor.cycles();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.cycles(), stopped_at);
    }
}
