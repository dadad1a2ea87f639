//! Error types for session transitions.

use thiserror::Error;

/// A draw request that violated a state-machine precondition. Reported to the
/// caller as a value, never as a panic; the session state is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("all numbers have been drawn")]
    SessionComplete,

    #[error("session is paused")]
    Paused,
}
