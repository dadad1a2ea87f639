//! Session state machine: unique random draws from a fixed pool.

use rand::Rng;

use crate::error::SessionError;
use crate::record::{SessionRecord, SettingsRecord};

/// Size of the number pool unless configured otherwise.
pub const DEFAULT_POOL_SIZE: u32 = 100;
/// Fastest allowed auto-generation interval.
pub const MIN_AUTO_INTERVAL_SECS: u64 = 1;
/// Slowest allowed auto-generation interval.
pub const MAX_AUTO_INTERVAL_SECS: u64 = 10;
/// Auto-generation interval for a fresh session.
pub const DEFAULT_AUTO_INTERVAL_SECS: u64 = 2;

/// Clamp an interval (user input or stored value) into the supported range.
pub fn clamp_auto_interval(secs: u64) -> u64 {
    secs.clamp(MIN_AUTO_INTERVAL_SECS, MAX_AUTO_INTERVAL_SECS)
}

/// Draw-session state. One instance per process, owned by the engine; all
/// mutation goes through the methods below, which uphold the invariants:
/// `drawn` holds distinct values in `[1, pool_size]` in draw order, and
/// `current` is always its last element (or `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pool_size: u32,
    drawn: Vec<u32>,
    current: Option<u32>,
    paused: bool,
    auto_mode: bool,
    auto_interval_secs: u64,
}

impl SessionState {
    /// Fresh session: nothing drawn, paused, manual mode.
    pub fn new(pool_size: u32) -> Self {
        Self {
            pool_size,
            drawn: Vec::new(),
            current: None,
            paused: true,
            auto_mode: false,
            auto_interval_secs: DEFAULT_AUTO_INTERVAL_SECS,
        }
    }

    /// Rebuild state from persisted records, validating as we go: entries
    /// outside `[1, pool_size]` and duplicates are dropped (first occurrence
    /// wins), `current` is re-derived from the validated draw order, and the
    /// stored interval is clamped just like the setter would.
    pub fn from_records(
        session: &SessionRecord,
        settings: &SettingsRecord,
        pool_size: u32,
    ) -> Self {
        let mut drawn: Vec<u32> = Vec::with_capacity(session.generated_numbers.len());
        for &n in &session.generated_numbers {
            if (1..=pool_size).contains(&n) && !drawn.contains(&n) {
                drawn.push(n);
            }
        }
        let current = drawn.last().copied();
        Self {
            pool_size,
            drawn,
            current,
            paused: session.is_paused,
            auto_mode: settings.is_auto_mode,
            auto_interval_secs: clamp_auto_interval(settings.auto_speed),
        }
    }

    pub fn to_session_record(&self) -> SessionRecord {
        SessionRecord {
            current_number: self.current,
            generated_numbers: self.drawn.clone(),
            is_paused: self.paused,
        }
    }

    pub fn to_settings_record(&self) -> SettingsRecord {
        SettingsRecord {
            is_auto_mode: self.auto_mode,
            auto_speed: self.auto_interval_secs,
        }
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Drawn values in draw order.
    pub fn drawn(&self) -> &[u32] {
        &self.drawn
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn auto_interval_secs(&self) -> u64 {
        self.auto_interval_secs
    }

    /// Values not yet drawn, in ascending order.
    pub fn available(&self) -> Vec<u32> {
        (1..=self.pool_size)
            .filter(|n| !self.drawn.contains(n))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.pool_size as usize - self.drawn.len()
    }

    pub fn is_complete(&self) -> bool {
        self.drawn.len() == self.pool_size as usize
    }

    /// Draw one value uniformly at random from the remaining set.
    ///
    /// Rejected with `SessionComplete` when the pool is exhausted (terminal
    /// regardless of other flags) and with `Paused` while paused; rejection
    /// leaves the state untouched.
    pub fn draw(&mut self, rng: &mut impl Rng) -> Result<u32, SessionError> {
        if self.is_complete() {
            return Err(SessionError::SessionComplete);
        }
        if self.paused {
            return Err(SessionError::Paused);
        }
        let available = self.available();
        let value = available[rng.random_range(0..available.len())];
        self.drawn.push(value);
        self.current = Some(value);
        Ok(value)
    }

    /// Flip the pause flag. Returns the new value.
    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    /// Back to a fresh session. Settings (auto mode, interval) survive.
    pub fn reset(&mut self) {
        self.drawn.clear();
        self.current = None;
        self.paused = true;
    }

    /// Enable or disable auto-generation. Enabling forces a pause so the
    /// session never bursts into draws the moment the switch is flipped;
    /// the user resumes explicitly.
    pub fn set_auto_mode(&mut self, enabled: bool) {
        self.auto_mode = enabled;
        if enabled {
            self.paused = true;
        }
    }

    /// Set the auto-generation interval, clamped to the supported range.
    /// Returns the value actually stored.
    pub fn set_auto_interval(&mut self, secs: u64) -> u64 {
        self.auto_interval_secs = clamp_auto_interval(secs);
        self.auto_interval_secs
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}
