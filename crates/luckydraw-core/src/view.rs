//! Read-only projection of the session state.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;

/// Immutable snapshot emitted to subscribers after every state change.
/// Consumers render it; they never mutate state through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub current: Option<u32>,
    pub drawn_count: usize,
    pub remaining_count: usize,
    pub is_complete: bool,
    pub is_paused: bool,
    pub is_auto_mode: bool,
    pub auto_interval_secs: u64,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            current: state.current(),
            drawn_count: state.drawn().len(),
            remaining_count: state.remaining(),
            is_complete: state.is_complete(),
            is_paused: state.paused(),
            is_auto_mode: state.auto_mode(),
            auto_interval_secs: state.auto_interval_secs(),
        }
    }
}
