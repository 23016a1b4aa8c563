use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Disk usage summary read by the health-score view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub total_space: u64,
    pub available_space: u64,
    pub used_space: u64,
    pub used_percent: f32,
    /// 0-100, higher is healthier.
    pub score: u8,
    pub collected_at: DateTime<Utc>,
    /// Refresh generation this signal was collected for.
    pub refresh_generation: u64,
}

impl HealthSignal {
    pub fn from_totals(total_space: u64, available_space: u64, refresh_generation: u64) -> Self {
        let available_space = available_space.min(total_space);
        let used_space = total_space - available_space;
        let used_percent = if total_space > 0 {
            (used_space as f64 / total_space as f64 * 100.0) as f32
        } else {
            0.0
        };
        HealthSignal {
            total_space,
            available_space,
            used_space,
            used_percent,
            score: health_score(used_percent),
            collected_at: Utc::now(),
            refresh_generation,
        }
    }
}

/// Full marks up to half the disk used, falling linearly to zero at 100%.
pub fn health_score(used_percent: f32) -> u8 {
    let score = (100.0 - used_percent) * 2.0;
    score.clamp(0.0, 100.0).round() as u8
}

pub trait HealthSource: Send + Sync {
    fn aggregate_health_signal(&self) -> Option<HealthSignal>;
}

#[cfg(feature = "disk-health")]
pub use monitor::DiskHealthMonitor;

#[cfg(feature = "disk-health")]
mod monitor {
    use std::sync::{Arc, RwLock};

    use log::{debug, warn};
    use sysinfo::Disks;
    use tokio::sync::broadcast::error::RecvError;
    use tokio::task::{self, JoinHandle};

    use super::{HealthSignal, HealthSource};
    use crate::dashboard::{DashboardEvent, DashboardStore};

    /// Re-reads local disk usage every time the dashboard fires a refresh.
    #[derive(Clone, Default)]
    pub struct DiskHealthMonitor {
        latest: Arc<RwLock<Option<HealthSignal>>>,
    }

    impl DiskHealthMonitor {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn refresh(&self, generation: u64) -> Option<HealthSignal> {
            let signal = match task::spawn_blocking(move || collect_disk_signal(generation)).await {
                Ok(signal) => signal,
                Err(join_err) => {
                    warn!("disk health collection failed: {}", join_err);
                    None
                }
            };
            if let Some(signal) = signal.as_ref() {
                *self.latest.write().unwrap_or_else(|p| p.into_inner()) = Some(signal.clone());
            }
            signal
        }

        pub fn spawn_refresh_listener(&self, store: &DashboardStore) -> JoinHandle<()> {
            let monitor = self.clone();
            let mut events = store.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(DashboardEvent::Refresh(generation)) => {
                            monitor.refresh(generation).await;
                        }
                        Ok(DashboardEvent::ScanAll(_)) => {}
                        Err(RecvError::Lagged(missed)) => {
                            debug!("health listener lagged by {} event(s)", missed);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        }
    }

    impl HealthSource for DiskHealthMonitor {
        fn aggregate_health_signal(&self) -> Option<HealthSignal> {
            self.latest.read().unwrap_or_else(|p| p.into_inner()).clone()
        }
    }

    fn collect_disk_signal(generation: u64) -> Option<HealthSignal> {
        let mut disks = Disks::new_with_refreshed_list();
        disks.refresh();
        let fixed: Vec<_> = disks.list().iter().filter(|d| !d.is_removable()).collect();
        if fixed.is_empty() {
            debug!("no fixed disks discovered");
            return None;
        }
        let total: u64 = fixed.iter().map(|d| d.total_space()).sum();
        let available: u64 = fixed.iter().map(|d| d.available_space()).sum();
        Some(HealthSignal::from_totals(total, available, generation))
    }
}
