//! Experiment clock and high-precision waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Margin left for spinning when sleeping until a deadline.
const SPIN_MARGIN: Duration = Duration::from_millis(200);

/// Monotonic experiment clock.
///
/// Clones share the same origin, so a reset through one handle is seen by
/// every other handle (the stimulus program and the trigger hold one each).
#[derive(Debug, Clone)]
pub struct Clock {
    base: Instant,
    /// Nanoseconds between `base` and the last reset.
    origin_ns: Arc<AtomicU64>,
}

impl Clock {
    /// Create a clock starting at zero now.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            origin_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Seconds since the last reset.
    pub fn time(&self) -> f64 {
        self.time_at(Instant::now())
    }

    /// Convert a captured instant to clock seconds. Instants before the last
    /// reset yield negative values.
    pub fn time_at(&self, at: Instant) -> f64 {
        let at_ns = at.saturating_duration_since(self.base).as_nanos() as f64;
        let origin_ns = self.origin_ns.load(Ordering::SeqCst) as f64;
        (at_ns - origin_ns) / 1e9
    }

    /// Restart the clock at zero.
    pub fn reset(&self) {
        let now_ns = self.base.elapsed().as_nanos() as u64;
        self.origin_ns.store(now_ns, Ordering::SeqCst);
    }

    /// Restart the clock so that the moment it read `time` becomes zero.
    pub fn reset_at(&self, time: f64) {
        let shift_ns = (time * 1e9) as i64;
        let _ = self
            .origin_ns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |origin| {
                Some(origin.saturating_add_signed(shift_ns))
            });
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep with the best resolution the platform offers.
pub fn precise_sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    #[cfg(target_os = "linux")]
    linux_sleep(duration);
    #[cfg(not(target_os = "linux"))]
    std::thread::sleep(duration);
}

#[cfg(target_os = "linux")]
fn linux_sleep(duration: Duration) {
    use libc::{clock_gettime, clock_nanosleep, timespec, CLOCK_MONOTONIC, EINTR, TIMER_ABSTIME};

    const NANOS_PER_SEC: u64 = 1_000_000_000;

    let mut now = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid, writable timespec.
    if unsafe { clock_gettime(CLOCK_MONOTONIC, &mut now) } != 0 {
        std::thread::sleep(duration);
        return;
    }

    // Absolute deadline, so a signal cannot shorten the sleep.
    let nanos = now.tv_nsec as u64 + u64::from(duration.subsec_nanos());
    let secs = duration.as_secs().saturating_add(nanos / NANOS_PER_SEC);
    let deadline = timespec {
        tv_sec: now
            .tv_sec
            .saturating_add(libc::time_t::try_from(secs).unwrap_or(libc::time_t::MAX)),
        tv_nsec: (nanos % NANOS_PER_SEC) as libc::c_long,
    };

    loop {
        // SAFETY: `deadline` is a valid timespec and the remainder pointer may
        // be null with TIMER_ABSTIME.
        let rc = unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, TIMER_ABSTIME, &deadline, std::ptr::null_mut())
        };
        if rc != EINTR {
            break;
        }
    }
}

/// Block until `deadline`: sleep until shortly before it, then spin.
pub fn sleep_until(deadline: Instant) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    precise_sleep(remaining.saturating_sub(SPIN_MARGIN));
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
