//! Request scheduling for upstream API calls
//!
//! This module handles:
//! - A fixed-rate limiter shared by every crawl branch of every request
//! - Global concurrency limiting of in-flight requests via a semaphore
//! - Cancellation while waiting for either of the above

use crate::{Result, WordCloudError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Fixed-rate slot issuer
///
/// Each caller reserves the next free slot with a compare-and-swap on the
/// slot clock and then sleeps until that slot. Requests are never rejected,
/// only delayed.
#[derive(Debug)]
pub struct RateLimiter {
    base: Instant,
    interval_nanos: u64,
    /// Nanoseconds after `base` at which the next slot is free
    next_slot: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter issuing `requests_per_second` slots per second
    pub fn new(requests_per_second: u32) -> Self {
        let rps = u64::from(requests_per_second.max(1));
        Self {
            base: Instant::now(),
            interval_nanos: 1_000_000_000 / rps,
            next_slot: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos)
    }

    /// Reserves the next slot and returns the instant it opens
    fn reserve(&self) -> Instant {
        let now = self.base.elapsed().as_nanos() as u64;
        let mut current = self.next_slot.load(Ordering::Acquire);

        loop {
            let slot = current.max(now);
            match self.next_slot.compare_exchange_weak(
                current,
                slot + self.interval_nanos,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return self.base + Duration::from_nanos(slot),
                Err(actual) => current = actual,
            }
        }
    }

    /// Waits for the next slot
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The slot is open
    /// * `Err(WordCloudError::Cancelled)` - The token fired while waiting
    pub async fn acquire(&self, token: &CancellationToken) -> Result<()> {
        let slot = self.reserve();

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(WordCloudError::Cancelled),
            _ = tokio::time::sleep_until(slot.into()) => Ok(()),
        }
    }
}

/// Permission to issue one upstream request
///
/// Holds an in-flight slot until dropped.
#[derive(Debug)]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

/// Scheduler gating every upstream request
///
/// The scheduler coordinates:
/// - Global concurrency limits (max requests in flight)
/// - The sustained request rate across all crawls in the process
#[derive(Debug)]
pub struct Scheduler {
    limiter: RateLimiter,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `requests_per_second` - Sustained upstream request rate
    /// * `max_in_flight` - Maximum concurrent upstream requests
    pub fn new(requests_per_second: u32, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            limiter: RateLimiter::new(requests_per_second),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Waits for an in-flight permit and then a rate slot
    ///
    /// The permit is taken first so a request never sits on a rate slot while
    /// queued behind the concurrency ceiling.
    ///
    /// # Returns
    ///
    /// * `Ok(RequestPermit)` - The request may be sent now
    /// * `Err(WordCloudError::Cancelled)` - The token fired while waiting
    pub async fn acquire(&self, token: &CancellationToken) -> Result<RequestPermit> {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(WordCloudError::Cancelled),
            permit = Arc::clone(&self.in_flight).acquire_owned() => {
                permit.map_err(|_| WordCloudError::Cancelled)?
            }
        };

        self.limiter.acquire(token).await?;
        tracing::trace!(
            "Request slot granted ({} of {} in flight)",
            self.in_flight_count(),
            self.max_in_flight
        );

        Ok(RequestPermit { _permit: permit })
    }

    /// Number of requests currently holding a permit
    pub fn in_flight_count(&self) -> usize {
        self.max_in_flight - self.in_flight.available_permits()
    }
}
