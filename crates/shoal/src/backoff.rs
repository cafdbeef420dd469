//! Contention management: a short-wait spinner for lock hand-offs and the
//! sleep-based retry policies used by the ring-queue hot paths.

use std::hint;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Incremental waiter for short critical sections.
///
/// Each [`relax`](Self::relax) round burns exponentially more PAUSE hints
/// while on-core spinning still pays off, then starts handing the core
/// back to the scheduler. Callers polling something slower than a lock
/// hand-off should check [`exhausted`](Self::exhausted) and fail over to
/// a sleeping strategy instead.
#[derive(Debug, Default)]
pub struct SpinWait {
    rounds: u32,
}

impl SpinWait {
    /// Rounds spent spinning before the first yield (2^7 hints at most).
    const SPIN_ROUNDS: u32 = 7;
    /// Rounds after which polling stops paying off altogether.
    const TOTAL_ROUNDS: u32 = 12;

    #[inline]
    pub const fn new() -> Self {
        Self { rounds: 0 }
    }

    /// Wait one round: a PAUSE burst early on, a scheduler yield later.
    #[inline]
    pub fn relax(&mut self) {
        if self.rounds < Self::SPIN_ROUNDS {
            for _ in 0..(1u32 << self.rounds) {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.rounds < Self::TOTAL_ROUNDS {
            self.rounds += 1;
        }
    }

    /// True once every round has been burned; time to stop polling.
    #[inline]
    pub fn exhausted(&self) -> bool {
        self.rounds >= Self::TOTAL_ROUNDS
    }

    /// Rearm for the next wait cycle.
    #[inline]
    pub fn restart(&mut self) {
        self.rounds = 0;
    }
}

/// Retry policies for the ring-queue hot paths, each tuned to the cost of
/// the operation it guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Simple CAS contention. Yield first, then up to 100 µs.
    Fast,
    /// Blocking-mode wait for space. Exponential, capped at 10 ms.
    Patient,
    /// Multi-step reader paths. Exponential, capped at 5 ms.
    Complex,
    /// Overwrite-mode stolen-head path. Linear, capped at 50 µs, meant to
    /// fail fast.
    Critical,
}

impl RetryStrategy {
    /// Sleep (or yield) appropriately for the given attempt number and
    /// return the time actually spent sleeping, for telemetry.
    ///
    /// Delays carry ±25 % jitter to avoid thundering herds.
    pub fn backoff(self, attempt: u32) -> Duration {
        let delay_us: u64 = match self {
            RetryStrategy::Fast => {
                if attempt < 10 {
                    thread::yield_now();
                    return Duration::ZERO;
                }
                (1u64 << ((attempt - 10) / 5).min(12)).min(100)
            }
            RetryStrategy::Patient => {
                if attempt < 5 {
                    thread::yield_now();
                    return Duration::ZERO;
                }
                (1u64 << ((attempt - 5) / 10).min(20)).min(10_000)
            }
            RetryStrategy::Complex => {
                if attempt < 3 {
                    thread::yield_now();
                    return Duration::ZERO;
                }
                ((1u64 << ((attempt - 3) / 8).min(20)) * 2).min(5_000)
            }
            RetryStrategy::Critical => {
                if attempt < 5 {
                    thread::yield_now();
                    return Duration::ZERO;
                }
                u64::from(attempt).min(50)
            }
        };

        let jitter = rand::thread_rng().gen_range(0..=delay_us / 2 + 1) as i64 - (delay_us / 4) as i64;
        let delay_us = (delay_us as i64 + jitter).max(1) as u64;

        let start = Instant::now();
        thread::sleep(Duration::from_micros(delay_us));
        start.elapsed()
    }
}
