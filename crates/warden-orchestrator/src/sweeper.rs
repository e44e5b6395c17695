use crate::accountability::AccountabilityTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background loop running the accountability check and enforcement passes.
///
/// The first pass runs immediately; later passes follow `interval`. Missed
/// ticks are skipped rather than bunched.
pub struct Sweeper {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    passes: Arc<AtomicU64>,
}

impl Sweeper {
    /// Spawns the loop on the current tokio runtime.
    pub fn start(tracker: Arc<AccountabilityTracker>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let passes = Arc::new(AtomicU64::new(0));
        let counter = passes.clone();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = interval.as_secs(), "accountability sweeper started");
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let status = tracker.check_accountability();
                        let enforced = tracker.enforce_accountability().await;
                        counter.fetch_add(1, Ordering::Relaxed);
                        if enforced.failures > 0 {
                            warn!(failures = enforced.failures, "enforcement actions failed");
                        }
                        debug!(
                            on_track = status.on_track.len(),
                            warning = status.warning.len(),
                            critical = status.critical.len(),
                            emergency = status.emergency.len(),
                            warnings = enforced.warnings,
                            escalations = enforced.escalations,
                            reassignments = enforced.reassignments,
                            "accountability sweep"
                        );
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("accountability sweeper stopped");
        });

        Self {
            stop_tx,
            handle,
            passes,
        }
    }

    /// Completed passes so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Signals the loop and waits for it to finish its current pass.
    pub async fn stop(self) -> u64 {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
        self.passes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::evidence::ValidatorSet;
    use crate::notify::ChannelNotifier;

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_until_stopped() {
        let (notifier, mut rx) = ChannelNotifier::channel(16);
        let tracker = Arc::new(AccountabilityTracker::new(
            ValidatorSet::new(),
            Arc::new(notifier),
        ));
        tracker
            .assign_at(
                "t1",
                "agent-a",
                "overdue soon",
                chrono::Duration::hours(10),
                Vec::new(),
                chrono::Utc::now() - chrono::Duration::hours(9),
            )
            .unwrap();

        let sweeper = Sweeper::start(tracker.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(150)).await;
        let passes = sweeper.stop().await;

        assert!(passes >= 2);
        let warning = rx.try_recv().unwrap();
        assert_eq!(warning.recipient, "agent-a");
        // one warning per record, however many sweeps
        assert!(rx.try_recv().is_err());
    }
}
