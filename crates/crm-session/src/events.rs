use crm_core::{InvalidationReason, User};

use crate::error::AuthError;

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Emitted by the refresh scheduler.
///
/// `generation` identifies the scheduler run that produced the event; a
/// listener drops events from a run that has since been stopped.
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    Refreshed { access_token: String, generation: u64 },
    Fatal { error: AuthError, generation: u64 },
}

/// Emitted by the session validator on a valid to invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInvalid {
    pub reason: InvalidationReason,
    pub generation: u64,
}

/// What the controller reports to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user: User },
    Refreshed,
    Invalidated { reason: InvalidationReason },
    LoggedOut,
}
