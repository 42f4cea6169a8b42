//! Background time-variance monitor
//!
//! A tokio task polls the radio clock and reports `radio - host` in seconds
//! through a callback. The task ends on [`VarianceMonitor::stop`] or when the
//! handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::module::TimeOfDay;

/// Handle to a running monitor
#[derive(Debug)]
pub struct VarianceMonitor {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl VarianceMonitor {
    /// Start polling `tod` every `period`
    pub fn spawn<F>(tod: Arc<TimeOfDay>, period: Duration, on_variance: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_monitor(tod, period, on_variance, shutdown_rx));
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Whether the task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the task and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Time variance monitor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for VarianceMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_monitor<F>(
    tod: Arc<TimeOfDay>,
    period: Duration,
    on_variance: F,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    F: Fn(f64) + Send + Sync + 'static,
{
    info!("Time variance monitor started ({:?})", period);
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = timer.tick() => {
                match tod.time_variance().await {
                    Ok(delta) => on_variance(delta),
                    Err(e) => debug!("Time variance poll failed: {}", e),
                }
            }
        }
    }
    info!("Time variance monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::base_for;
    use rxctl_protocol::ModuleKind;
    use rxctl_sim::{spawn_local, SimConfig};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_reports_offset_until_stopped() {
        let sim = spawn_local(SimConfig {
            time_offset_s: 5.0,
            ..SimConfig::default()
        })
        .await
        .unwrap();
        let tod = Arc::new(TimeOfDay::new(base_for(&sim, "TOD", ModuleKind::TimeOfDay).await));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let monitor = VarianceMonitor::spawn(tod, Duration::from_millis(20), move |d| {
            sink.lock().unwrap().push(d);
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.is_running());
        monitor.stop().await;

        let seen = seen.lock().unwrap().clone();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|d| (d - 5.0).abs() < 0.5), "{seen:?}");
    }

    #[tokio::test]
    async fn test_drop_stops_task() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let tod = Arc::new(TimeOfDay::new(base_for(&sim, "TOD", ModuleKind::TimeOfDay).await));
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        let monitor = VarianceMonitor::spawn(tod, Duration::from_millis(10), move |_| {
            *sink.lock().unwrap() += 1;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(monitor);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = *count.lock().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*count.lock().unwrap(), settled);
    }
}
