//! Fetch pacing.
//!
//! [`RateBudget`] is the hard floor: a single next-free-slot instant shared
//! by every fetch in the process. [`Pacer`] layers the human-looking jitter
//! on top: think time before a fetch, a two-mode delay between jobs and an
//! occasional long pause.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::debug;

use shelf_core::config::PacingConfig;

// ── Rate budget ──────────────────────────────────────────────────────

/// Process-wide fetch budget. Not persisted.
#[derive(Debug)]
pub struct RateBudget {
    interval: Duration,
    next_free: Mutex<Option<Instant>>,
}

impl RateBudget {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next_free: Mutex::new(None) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next slot for a fetch of `cost` units, as seen at `now`.
    ///
    /// `slot = max(now, next_free)`, then `next_free = slot + interval * cost`.
    pub fn reserve_at(&self, now: Instant, cost: u32) -> Instant {
        let mut next_free = self.next_free.lock().unwrap_or_else(|e| e.into_inner());
        let slot = match *next_free {
            Some(next) if next > now => next,
            _ => now,
        };
        *next_free = Some(slot + self.interval * cost);
        slot
    }

    pub fn reserve(&self, cost: u32) -> Instant {
        self.reserve_at(Instant::now(), cost)
    }

    /// Reserve and sleep until the slot. Returns how long we waited.
    pub async fn wait(&self, cost: u32) -> Duration {
        let now = Instant::now();
        let slot = self.reserve_at(now, cost);
        let waited = slot.saturating_duration_since(now);
        if !waited.is_zero() {
            debug!(wait_ms = waited.as_millis() as u64, cost, "waiting for fetch slot");
            tokio::time::sleep_until(slot).await;
        }
        waited
    }
}

// ── Jitter ───────────────────────────────────────────────────────────

/// Ranges the [`Pacer`] draws from. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingProfile {
    pub fetch_interval: Duration,
    pub think_ms: (u64, u64),
    pub short_delay_ms: (u64, u64),
    pub long_delay_ms: (u64, u64),
    pub long_delay_chance: f64,
    pub long_pause_every: (u32, u32),
    pub long_pause_secs: (u64, u64),
    pub idle_poll: Duration,
}

impl PacingProfile {
    pub fn from_config(config: &PacingConfig) -> Self {
        Self {
            fetch_interval: Duration::from_millis(config.fetch_interval_ms),
            think_ms: (config.think_min_ms, config.think_max_ms),
            short_delay_ms: (config.job_delay_short_min_ms, config.job_delay_short_max_ms),
            long_delay_ms: (config.job_delay_long_min_ms, config.job_delay_long_max_ms),
            long_delay_chance: config.job_delay_long_chance,
            long_pause_every: (config.long_pause_every_min, config.long_pause_every_max),
            long_pause_secs: (config.long_pause_min_secs, config.long_pause_max_secs),
            idle_poll: Duration::from_millis(config.idle_poll_ms),
        }
    }

    /// No pacing at all. For tests and local replays.
    pub fn immediate() -> Self {
        Self {
            fetch_interval: Duration::ZERO,
            think_ms: (0, 0),
            short_delay_ms: (0, 0),
            long_delay_ms: (0, 0),
            long_delay_chance: 0.0,
            long_pause_every: (0, 0),
            long_pause_secs: (0, 0),
            idle_poll: Duration::ZERO,
        }
    }
}

/// The sleep chosen after a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterJobDelay {
    pub delay: Duration,
    /// True when this is the periodic long pause.
    pub long_pause: bool,
}

pub struct Pacer<R = StdRng> {
    profile: PacingProfile,
    rng: R,
    jobs_since_pause: u32,
    pause_after: u32,
}

impl Pacer<StdRng> {
    pub fn new(profile: PacingProfile) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }
}

impl<R: Rng> Pacer<R> {
    pub fn with_rng(profile: PacingProfile, mut rng: R) -> Self {
        let pause_after = draw_count(&mut rng, profile.long_pause_every);
        Self { profile, rng, jobs_since_pause: 0, pause_after }
    }

    pub fn profile(&self) -> &PacingProfile {
        &self.profile
    }

    /// Sleep before a fetch.
    pub fn think_time(&mut self) -> Duration {
        Duration::from_millis(draw(&mut self.rng, self.profile.think_ms))
    }

    /// Sleep after a finished job: usually short, sometimes long, and a
    /// multi-minute pause every `long_pause_every` jobs.
    pub fn after_job(&mut self) -> InterJobDelay {
        self.jobs_since_pause += 1;
        if self.pause_after > 0 && self.jobs_since_pause >= self.pause_after {
            self.jobs_since_pause = 0;
            self.pause_after = draw_count(&mut self.rng, self.profile.long_pause_every);
            let secs = draw(&mut self.rng, self.profile.long_pause_secs);
            return InterJobDelay { delay: Duration::from_secs(secs), long_pause: true };
        }

        let chance = self.profile.long_delay_chance.clamp(0.0, 1.0);
        let range = if self.rng.gen_bool(chance) {
            self.profile.long_delay_ms
        } else {
            self.profile.short_delay_ms
        };
        InterJobDelay {
            delay: Duration::from_millis(draw(&mut self.rng, range)),
            long_pause: false,
        }
    }

    pub fn idle(&self) -> Duration {
        self.profile.idle_poll
    }
}

fn draw<R: Rng>(rng: &mut R, (lo, hi): (u64, u64)) -> u64 {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

fn draw_count<R: Rng>(rng: &mut R, (lo, hi): (u32, u32)) -> u32 {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}
