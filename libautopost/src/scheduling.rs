//! Publish-time staggering for scheduled profiles
//!
//! Every (run, profile) pair gets its own cursor. The first request draws a
//! random delay within the profile's `[min_interval, max_interval]` minutes
//! and schedules `now + delay`. Each successful publish then advances the
//! cursor by a fresh draw, so timestamps keep increasing at the profile's own
//! pace no matter how long items take to process.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::types::Profile;
use crate::{AutopostError, Result};

/// Largest accepted interval bound, in minutes (30 days)
const MAX_INTERVAL_MINUTES: u32 = 30 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCursor {
    pub next_publish_time: DateTime<Utc>,
    pub last_delay: Duration,
}

pub struct ScheduleEngine {
    cursors: Mutex<HashMap<(String, String), ScheduleCursor>>,
    rng: Mutex<StdRng>,
}

impl Default for ScheduleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleEngine {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic engine for reproducible schedules
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Publish time to use for the next post to `profile` within `run_id`.
    ///
    /// Initializes the cursor on first use; repeated calls without an
    /// intervening [`advance`](Self::advance) return the same timestamp.
    pub fn next_time(&self, run_id: &str, profile: &Profile) -> DateTime<Utc> {
        self.next_time_at(run_id, profile, Utc::now())
    }

    pub fn next_time_at(&self, run_id: &str, profile: &Profile, now: DateTime<Utc>) -> DateTime<Utc> {
        let key = (run_id.to_string(), profile.id.clone());
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cursor) = cursors.get(&key) {
            return cursor.next_publish_time;
        }

        let delay = self.draw_delay(profile);
        let cursor = ScheduleCursor {
            next_publish_time: now + delay,
            last_delay: delay,
        };
        cursors.insert(key, cursor);
        cursor.next_publish_time
    }

    /// Move the cursor forward after a successful publish and return the new time
    pub fn advance(&self, run_id: &str, profile: &Profile) -> DateTime<Utc> {
        let key = (run_id.to_string(), profile.id.clone());
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let delay = self.draw_delay(profile);

        let cursor = cursors
            .entry(key)
            .and_modify(|cursor| {
                cursor.next_publish_time += delay;
                cursor.last_delay = delay;
            })
            .or_insert_with(|| ScheduleCursor {
                next_publish_time: Utc::now() + delay,
                last_delay: delay,
            });
        cursor.next_publish_time
    }

    pub fn cursor(&self, run_id: &str, profile_id: &str) -> Option<ScheduleCursor> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(run_id.to_string(), profile_id.to_string()))
            .copied()
    }

    /// Drop all cursors of a finished run
    pub fn clear_run(&self, run_id: &str) {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(run, _), _| run != run_id);
    }

    fn draw_delay(&self, profile: &Profile) -> Duration {
        let min_secs = i64::from(profile.min_interval) * 60;
        let max_secs = i64::from(profile.max_interval.max(profile.min_interval)) * 60;
        let secs = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(min_secs..=max_secs);

        Duration::try_seconds(secs).unwrap_or_else(|| Duration::minutes(i64::from(profile.min_interval)))
    }
}

/// Validate a profile's scheduling interval bounds
pub fn validate_interval(min_interval: u32, max_interval: u32) -> Result<()> {
    if min_interval == 0 {
        return Err(AutopostError::InvalidInput(
            "Minimum scheduling interval must be at least 1 minute".to_string(),
        ));
    }

    if max_interval > MAX_INTERVAL_MINUTES {
        return Err(AutopostError::InvalidInput(format!(
            "Maximum scheduling interval must be at most {} days",
            MAX_INTERVAL_MINUTES / (24 * 60)
        )));
    }

    if min_interval > max_interval {
        return Err(AutopostError::InvalidInput(format!(
            "Minimum scheduling interval ({}) exceeds maximum ({})",
            min_interval, max_interval
        )));
    }

    Ok(())
}
