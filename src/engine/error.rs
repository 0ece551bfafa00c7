//! Error types for booking operations.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::model::{BookingId, BookingStatus, InstanceId, TemplateId, UserId, VenueId};

/// Top-level error returned by [`Engine::apply`](super::Engine::apply).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("booking failed: {0}")]
    Book(#[from] BookError),

    #[error("transition failed: {0}")]
    Transition(#[from] TransitionError),

    #[error("ledger operation failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("scheduling failed: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Error while creating a new booking. Every variant is detected before any
/// write, so a failed booking leaves no partial state.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("instance {0} is not open for booking")]
    InstanceNotBookable(InstanceId),

    #[error("booking window for instance {0} is closed")]
    BookingWindowClosed(InstanceId),

    #[error("instance {0} is at capacity ({1} seats)")]
    CapacityExceeded(InstanceId, u32),

    #[error("user {user} already has an active booking {booking} for instance {instance}")]
    DuplicateActiveBooking {
        user: UserId,
        instance: InstanceId,
        booking: BookingId,
    },

    #[error(transparent)]
    InsufficientBalance(#[from] LedgerError),
}

/// Error during a state-machine transition on an existing booking.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("booking {booking} belongs to user {owner}, not {caller}")]
    NotBookingOwner {
        booking: BookingId,
        owner: UserId,
        caller: UserId,
    },

    #[error("{event}: booking {booking} is {from:?}, transition not allowed")]
    InvalidTransition {
        booking: BookingId,
        from: BookingStatus,
        event: &'static str,
    },
}

/// Error while generating instances or propagating template/venue edits.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("template {0} not found")]
    TemplateNotFound(TemplateId),

    #[error("venue {0} not found")]
    VenueNotFound(VenueId),

    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("instance {0} is no longer scheduled")]
    InstanceClosed(InstanceId),

    #[error("instance id {0} already in use")]
    InstanceIdTaken(InstanceId),
}
