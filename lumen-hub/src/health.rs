use crate::hub::SharedHub;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::task;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct HubHealth {
    pub uptime_seconds: u64,
    pub lamps_installed: u32,
    pub lamps_connected: u32,
    pub observers: u32,
    pub store_revision: u64,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub async fn get_health(&self, hub: &SharedHub) -> HubHealth {
        HubHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            lamps_installed: hub.store().len().await as u32,
            lamps_connected: hub.live_count() as u32,
            observers: hub.observer_count() as u32,
            store_revision: hub.store().revision(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }

    /// Résumé périodique dans les logs (5 min)
    pub fn spawn_health_logger(&self, hub: SharedHub) {
        let tracker = self.clone();
        task::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                let health = tracker.get_health(&hub).await;
                info!(
                    "[health] uptime {}s, {} lamps ({} connected), {} observers",
                    health.uptime_seconds,
                    health.lamps_installed,
                    health.lamps_connected,
                    health.observers
                );
            }
        });
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let rss_kb = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| {
                status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
            });
        if let Some(kb) = rss_kb {
            return kb as f32 / 1024.0;
        }
    }
    0.0
}
