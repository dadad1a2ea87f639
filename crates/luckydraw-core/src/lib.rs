//! Core session state machine for the Lucky Draw number caller.
//!
//! This crate is pure logic: the draw-session state, its transition rules,
//! the persisted wire formats, and the read-only view emitted to consumers.
//! Storage, scheduling, and rendering live in `luckydraw-engine`.

mod error;
mod record;
mod state;
mod view;

pub use error::SessionError;
pub use record::{SESSION_KEY, SETTINGS_KEY, SessionRecord, SettingsRecord};
pub use state::{
    DEFAULT_AUTO_INTERVAL_SECS, DEFAULT_POOL_SIZE, MAX_AUTO_INTERVAL_SECS,
    MIN_AUTO_INTERVAL_SECS, SessionState, clamp_auto_interval,
};
pub use view::SessionView;
