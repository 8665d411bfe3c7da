//! Per-server rate limiting: sliding-window call rate plus concurrency slots.
//!
//! Each registered server gets an independent [`CallWindow`]: a time-ordered
//! deque of call timestamps inside the trailing 60-second window, and an
//! in-flight counter. `acquire` is a non-blocking probe that admits or
//! rejects immediately; callers wanting to wait must back off and retry
//! themselves. Admission requires both constraints to pass, checked in order:
//! call rate first, then concurrency. A rejected acquire mutates nothing.
//!
//! One mutex per server window makes acquire/release a single critical
//! section for that server; different servers never contend.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Trailing window for the call-rate constraint.
const RATE_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Admission
// ============================================================================

/// Outcome of an admission probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Both constraints passed; the call was recorded and holds a slot.
    Admitted,
    /// Sliding-window call count reached the per-minute cap.
    DeniedCallRate {
        /// Calls observed inside the trailing window.
        recent_calls: u32,
        /// The configured per-minute cap.
        limit: u32,
    },
    /// In-flight count reached the concurrency cap.
    DeniedConcurrency {
        /// Calls currently in flight.
        in_flight: u32,
        /// The configured concurrency cap.
        limit: u32,
    },
}

impl Admission {
    /// True for [`Admission::Admitted`].
    #[must_use]
    #[inline]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admitted => write!(f, "admitted"),
            Self::DeniedCallRate { recent_calls, limit } => write!(
                f,
                "call rate limit reached: {recent_calls} calls in the last 60s (limit {limit})"
            ),
            Self::DeniedConcurrency { in_flight, limit } => write!(
                f,
                "concurrency limit reached: {in_flight} calls in flight (limit {limit})"
            ),
        }
    }
}

// ============================================================================
// Per-server window
// ============================================================================

/// Sliding-window call tracker for one server.
///
/// Expired timestamps are evicted lazily on each probe. `in_flight` is only
/// ever changed by an admitted probe or a release.
#[derive(Debug)]
struct CallWindow {
    /// Timestamps of admitted calls inside the trailing window.
    timestamps: VecDeque<Instant>,
    /// Calls admitted but not yet released.
    in_flight: u32,
    /// Per-minute cap.
    max_calls_per_minute: u32,
    /// Concurrency cap.
    max_concurrent_calls: u32,
    /// Window length (shortened in unit tests).
    window: Duration,
}

impl CallWindow {
    fn new(max_calls_per_minute: u32, max_concurrent_calls: u32, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            in_flight: 0,
            max_calls_per_minute,
            max_concurrent_calls,
            window,
        }
    }

    /// Two-phase probe: call rate, then concurrency. Only an admission
    /// records a timestamp or touches the in-flight count.
    fn try_admit(&mut self) -> Admission {
        self.evict_old();

        let recent = u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX);
        if recent >= self.max_calls_per_minute {
            return Admission::DeniedCallRate {
                recent_calls: recent,
                limit: self.max_calls_per_minute,
            };
        }

        if self.in_flight >= self.max_concurrent_calls {
            return Admission::DeniedConcurrency {
                in_flight: self.in_flight,
                limit: self.max_concurrent_calls,
            };
        }

        self.timestamps.push_back(Instant::now());
        self.in_flight += 1;
        Admission::Admitted
    }

    /// Return a slot. Floored at zero; excess releases are a no-op.
    fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn update_limits(&mut self, max_calls_per_minute: u32, max_concurrent_calls: u32) {
        self.max_calls_per_minute = max_calls_per_minute;
        self.max_concurrent_calls = max_concurrent_calls;
    }

    /// Remove timestamps older than the window.
    fn evict_old(&mut self) {
        let now = Instant::now();
        while let Some(ts) = self.timestamps.front() {
            if now.duration_since(*ts) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// Arena of per-server call windows.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Arc<parking_lot::Mutex<CallWindow>>>,
    window_duration: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create a limiter with the standard 60-second rate window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            window_duration: RATE_WINDOW,
        }
    }

    /// Limiter with a shortened window, for eviction tests.
    #[cfg(test)]
    fn with_window(window_duration: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window_duration,
        }
    }

    /// Create or update the window for `server_id`.
    ///
    /// Idempotent upsert: an existing window keeps its timestamps and
    /// in-flight count; only the limits change.
    pub fn register(&self, server_id: &str, max_calls_per_minute: u32, max_concurrent_calls: u32) {
        self.windows
            .entry(server_id.to_string())
            .and_modify(|w| {
                w.lock().update_limits(max_calls_per_minute, max_concurrent_calls);
            })
            .or_insert_with(|| {
                debug!(server = server_id, "Rate limiter window created");
                Arc::new(parking_lot::Mutex::new(CallWindow::new(
                    max_calls_per_minute,
                    max_concurrent_calls,
                    self.window_duration,
                )))
            });
    }

    /// Drop the window for `server_id`. Returns `false` when unknown.
    pub fn deregister(&self, server_id: &str) -> bool {
        self.windows.remove(server_id).is_some()
    }

    /// True when a window exists for `server_id`.
    #[must_use]
    pub fn is_registered(&self, server_id: &str) -> bool {
        self.windows.contains_key(server_id)
    }

    /// Probe for admission. `None` when the server is unknown.
    #[must_use]
    pub fn acquire(&self, server_id: &str) -> Option<Admission> {
        self.windows.get(server_id).map(|w| w.lock().try_admit())
    }

    /// Return a slot after a call finishes. Returns `false` when the server
    /// is unknown; never underflows on excess releases.
    pub fn release(&self, server_id: &str) -> bool {
        match self.windows.get(server_id) {
            Some(w) => {
                w.lock().release();
                true
            }
            None => false,
        }
    }

    /// Current in-flight count for `server_id`.
    #[must_use]
    pub fn in_flight(&self, server_id: &str) -> Option<u32> {
        self.windows.get(server_id).map(|w| w.lock().in_flight)
    }

    /// Calls inside the trailing window for `server_id`, after eviction.
    #[must_use]
    pub fn recent_calls(&self, server_id: &str) -> Option<u32> {
        self.windows.get(server_id).map(|w| {
            let mut w = w.lock();
            w.evict_old();
            u32::try_from(w.timestamps.len()).unwrap_or(u32::MAX)
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
