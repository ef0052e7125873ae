//! One-shot renewal timer.
//!
//! At most one deferred renewal is pending per scheduler. Arming always
//! cancels the previous timer; a fired timer is re-armed by the renewal it
//! triggers, not by the scheduler.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Renew this long before expiry (5 minutes)
pub const RENEW_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// What `arm` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// Already expired; no timer armed. The caller must renew or sign out.
    Expired,
    /// Inside the threshold; renewal was started immediately, no timer armed.
    RenewNow,
    /// Renewal will fire after the contained delay.
    Scheduled(Duration),
}

struct PendingRenewal {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    generation: u64,
    pending: Option<PendingRenewal>,
}

pub struct RenewalScheduler {
    threshold: Duration,
    state: Arc<Mutex<SchedulerState>>,
}

impl RenewalScheduler {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: Default::default(),
        }
    }

    /// Arm against an expiry in epoch seconds, using the wall clock.
    pub fn arm<F, Fut>(&self, expiry_secs: i64, renew: F) -> ArmOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.arm_at(expiry_secs, Utc::now().timestamp_millis(), renew)
    }

    /// Arm against an explicit clock (epoch milliseconds).
    pub fn arm_at<F, Fut>(&self, expiry_secs: i64, now_ms: i64, renew: F) -> ArmOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let time_left_ms = expiry_secs.saturating_mul(1000).saturating_sub(now_ms);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = state.pending.take() {
            previous.handle.abort();
            debug!(generation = previous.generation, "Cancelled pending renewal");
        }
        state.generation += 1;

        if time_left_ms < 0 {
            debug!(time_left_ms, "Credential already expired, not arming");
            return ArmOutcome::Expired;
        }

        let time_left = Duration::from_millis(time_left_ms as u64);
        if time_left < self.threshold {
            drop(state);
            info!(time_left_ms, "Credential expires soon, renewing now");
            tokio::spawn(renew());
            return ArmOutcome::RenewNow;
        }

        let delay = time_left - self.threshold;
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach before renewing so the renewal's own re-arm cannot abort us.
            {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if state.pending.as_ref().map(|p| p.generation) != Some(generation) {
                    return;
                }
                state.pending = None;
            }
            info!(generation, "Renewal timer fired");
            renew().await;
        });
        state.pending = Some(PendingRenewal { generation, handle });
        debug!(generation, delay_secs = delay.as_secs(), "Renewal scheduled");
        ArmOutcome::Scheduled(delay)
    }

    /// Cancel any pending renewal. Safe to call repeatedly.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = state.pending.take() {
            pending.handle.abort();
            debug!(generation = pending.generation, "Renewal cancelled");
        }
    }

    /// Whether a deferred renewal is waiting to fire.
    pub fn is_pending(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .pending
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }
}

impl Default for RenewalScheduler {
    fn default() -> Self {
        Self::new(RENEW_THRESHOLD)
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NOW_MS: i64 = 1_700_000_000_000;

    fn counter() -> (Arc<AtomicU32>, impl Fn() -> Box<dyn FnOnce() -> futures::future::Ready<()> + Send>) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let make = move || {
            let c = Arc::clone(&c);
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(())
            }) as Box<dyn FnOnce() -> futures::future::Ready<()> + Send>
        };
        (count, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_does_not_arm() {
        let scheduler = RenewalScheduler::default();
        let (count, make) = counter();
        let outcome = scheduler.arm_at(NOW_MS / 1000 - 1, NOW_MS, make());
        assert_eq!(outcome, ArmOutcome::Expired);
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inside_threshold_renews_immediately() {
        let scheduler = RenewalScheduler::default();
        let (count, make) = counter();
        let outcome = scheduler.arm_at(NOW_MS / 1000 + 60, NOW_MS, make());
        assert_eq!(outcome, ArmOutcome::RenewNow);
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_exactly_now_renews_immediately() {
        let scheduler = RenewalScheduler::default();
        let (_count, make) = counter();
        assert_eq!(scheduler.arm_at(NOW_MS / 1000, NOW_MS, make()), ArmOutcome::RenewNow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedules_threshold_before_expiry() {
        let scheduler = RenewalScheduler::default();
        let (count, make) = counter();
        let outcome = scheduler.arm_at(NOW_MS / 1000 + 3600, NOW_MS, make());
        assert_eq!(outcome, ArmOutcome::Scheduled(Duration::from_secs(3300)));
        assert!(scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(3299)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_timer() {
        let scheduler = RenewalScheduler::default();
        let (first, make_first) = counter();
        let (second, make_second) = counter();

        scheduler.arm_at(NOW_MS / 1000 + 600, NOW_MS, make_first());
        scheduler.arm_at(NOW_MS / 1000 + 900, NOW_MS, make_second());
        assert!(scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let scheduler = RenewalScheduler::default();
        let (count, make) = counter();
        scheduler.cancel();
        scheduler.arm_at(NOW_MS / 1000 + 3600, NOW_MS, make());
        scheduler.cancel();
        scheduler.cancel();
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_timer_survives_rearm_from_callback() {
        let scheduler = Arc::new(RenewalScheduler::default());
        let completed = Arc::new(AtomicU32::new(0));

        let inner = Arc::clone(&scheduler);
        let done = Arc::clone(&completed);
        scheduler.arm_at(NOW_MS / 1000 + 600, NOW_MS, move || async move {
            // The renewal re-arms before finishing its own work.
            let (_c, make) = counter();
            inner.arm(Utc::now().timestamp() + 3600, make());
            tokio::time::sleep(Duration::from_millis(10)).await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_pending());
    }
}
