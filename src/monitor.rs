use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::Registry;

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the registry on a fixed cadence and drops tunnels whose ssh died.
///
/// Dead tunnels are never restarted; the operator reconnects from the menu.
pub fn spawn(registry: Registry, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = interval.as_millis() as u64, "health monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // a toggle may hold the lock through a reachability probe
                    let registry = registry.clone();
                    match tokio::task::spawn_blocking(move || registry.reap_dead()).await {
                        Ok(reaped) => {
                            for (id, name) in reaped {
                                info!(tunnel = %name, id, "tunnel process exited, removed");
                            }
                        }
                        Err(e) => warn!(error = %e, "health check failed"),
                    }
                }
            }
        }

        debug!("health monitor stopped");
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{self, Signal};
    use crate::registry::TunnelHandle;
    use std::process::Command;

    #[tokio::test]
    async fn reaps_externally_killed_tunnel_within_one_interval() {
        let registry = Registry::new();
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        registry.register(0, TunnelHandle::new("db", child, vec![5432, 5433]));

        let interval = Duration::from_millis(200);
        let cancel = CancellationToken::new();
        let monitor = spawn(registry.clone(), interval, cancel.clone());

        tokio::time::sleep(interval).await;
        assert!(registry.is_live(0));

        process::send_signal(pid, Signal::Kill).unwrap();
        // one interval plus slack for the kill to land
        tokio::time::sleep(interval + Duration::from_millis(150)).await;

        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let cancel = CancellationToken::new();
        let monitor = spawn(Registry::new(), Duration::from_millis(50), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor should stop")
            .unwrap();
    }
}
