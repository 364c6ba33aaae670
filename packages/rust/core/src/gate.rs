//! Backpressure gate shared by every source in a run.
//!
//! Two limits apply to each inference call:
//! - a token bucket paces admissions (one token per interval, `burst` capacity)
//! - a semaphore bounds the number of calls in flight
//!
//! Both waits race the run's [`CancellationToken`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sieve_shared::{GateSettings, Result, SieveError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

/// Reservation-style token bucket: a caller always gets a token, but may have
/// to wait for it. The balance goes negative while callers are queued.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(interval: Duration, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            interval,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() / self.interval.as_secs_f64()).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token; returns how long the caller must wait before using it.
    fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            self.interval.mul_f64(-self.tokens)
        }
    }

    /// Give back a token whose wait was abandoned.
    fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    admitted: AtomicU64,
}

/// Point-in-time gate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStats {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub admitted: u64,
}

/// Paces and bounds calls to the inference service.
#[derive(Debug)]
pub struct BackpressureGate {
    bucket: Mutex<TokenBucket>,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
}

/// Admission slot held for the duration of one call. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _slot: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackpressureGate {
    pub fn new(interval: Duration, burst: u32, max_in_flight: usize) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(interval, burst)),
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn from_settings(settings: &GateSettings) -> Self {
        Self::new(
            settings.interval(),
            settings.burst(),
            settings.max_in_flight(),
        )
    }

    /// Wait for a rate token, then for an admission slot.
    ///
    /// Returns [`SieveError::Cancelled`] as soon as `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        if cancel.is_cancelled() {
            return Err(SieveError::Cancelled);
        }

        self.wait_for_token(cancel).await?;

        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SieveError::Cancelled),
            slot = self.slots.clone().acquire_owned() => {
                slot.map_err(|_| SieveError::Task("backpressure gate closed".into()))?
            }
        };

        let now_in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .peak_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);
        self.counters.admitted.fetch_add(1, Ordering::SeqCst);

        Ok(GatePermit {
            _slot: slot,
            counters: Arc::clone(&self.counters),
        })
    }

    async fn wait_for_token(&self, cancel: &CancellationToken) -> Result<()> {
        let wait = self.bucket().reserve(Instant::now());
        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.bucket().refund();
                Err(SieveError::Cancelled)
            }
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    fn bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
            admitted: self.counters.admitted.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_paced() {
        let gate = BackpressureGate::new(Duration::from_millis(500), 3, 10);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut admitted_at = Vec::new();
        for _ in 0..6 {
            let _permit = gate.acquire(&cancel).await.expect("acquire");
            admitted_at.push(start.elapsed());
        }

        // The first `burst` admissions are immediate.
        assert!(admitted_at[..3].iter().all(|t| *t < Duration::from_millis(1)));
        // After that, admissions are spaced by the interval.
        for pair in admitted_at[2..].windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(499), "{admitted_at:?}");
        }
        assert_eq!(gate.stats().admitted, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn bounds_in_flight() {
        let gate = Arc::new(BackpressureGate::new(Duration::from_millis(1), 100, 2));
        let cancel = CancellationToken::new();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = gate.acquire(&cancel).await.expect("acquire");
                tokio::time::sleep(Duration::from_millis(50)).await;
            });
        }
        while tasks.join_next().await.is_some() {}

        let stats = gate.stats();
        assert_eq!(stats.admitted, 8);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_rate_wait() {
        let gate = BackpressureGate::new(Duration::from_secs(60), 1, 1);
        let cancel = CancellationToken::new();
        let _first = gate.acquire(&cancel).await.expect("first token is free");

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = gate.acquire(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_interrupts_slot_wait() {
        let gate = BackpressureGate::new(Duration::from_millis(1), 10, 1);
        let cancel = CancellationToken::new();
        let _held = gate.acquire(&cancel).await.expect("slot");

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = gate.acquire(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn zero_settings_use_defaults() {
        let gate = BackpressureGate::from_settings(&GateSettings {
            interval_ms: 0,
            burst: 0,
            max_in_flight: 0,
        });
        assert_eq!(gate.slots.available_permits(), 5);
        assert_eq!(gate.bucket().capacity, 5.0);
    }
}
