//! Core domain types for the booking engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Credits;

/// Consumer identifier, resolved by the surrounding auth layer.
pub type UserId = u32;

/// Class template identifier.
pub type TemplateId = u32;

/// Venue identifier.
pub type VenueId = u32;

/// Business (class provider) identifier.
pub type BusinessId = u32;

/// Scheduled instance identifier.
pub type InstanceId = u32;

/// Booking record identifier.
pub type BookingId = u64;

/// Status of a scheduled instance.
///
/// The string forms are a contract with downstream reporting consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Scheduled,
    Cancelled,
    Completed,
}

/// Status of a booking record.
///
/// The string forms are a contract with downstream reporting consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    AwaitingApproval,
    Pending,
    Completed,
    CancelledByConsumer,
    CancelledByBusiness,
    CancelledByBusinessRebookable,
    RejectedByBusiness,
    NoShow,
}

impl BookingStatus {
    /// Business-initiated closures leave the seat open to the same user again.
    pub fn permits_rebooking(self) -> bool {
        matches!(
            self,
            BookingStatus::CancelledByBusiness
                | BookingStatus::CancelledByBusinessRebookable
                | BookingStatus::RejectedByBusiness
        )
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::CancelledByConsumer
                | BookingStatus::NoShow
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::AwaitingApproval => "awaiting_approval",
            BookingStatus::Pending => "pending",
            BookingStatus::Completed => "completed",
            BookingStatus::CancelledByConsumer => "cancelled_by_consumer",
            BookingStatus::CancelledByBusiness => "cancelled_by_business",
            BookingStatus::CancelledByBusinessRebookable => "cancelled_by_business_rebookable",
            BookingStatus::RejectedByBusiness => "rejected_by_business",
            BookingStatus::NoShow => "no_show",
        }
    }
}

/// Condition under which a discount rule applies, evaluated against the
/// hours remaining until the instance starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountCondition {
    /// Matches when at least this many hours remain (early-bird).
    HoursBeforeMin(i64),
    /// Matches when at most this many hours remain and the instance has not
    /// started (last-minute).
    HoursBeforeMax(i64),
    /// Always matches, including after the instance has started.
    Always,
}

/// A named fixed-amount discount attached to a template or an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: u32,
    pub name: String,
    pub condition: DiscountCondition,
    pub amount: Credits,
}

/// Refund applied when a consumer cancels inside the cancellation window.
/// Outside the window the refund is always full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    #[default]
    Full,
    None,
    /// Percentage of the charged price refunded, rounded down.
    Partial(u8),
}

/// Window before the start time during which booking is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    pub min_hours: i64,
    pub max_hours: i64,
}

/// Reusable class definition from which scheduled instances are generated.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: TemplateId,
    pub business: BusinessId,
    pub name: String,
    pub duration_mins: u32,
    pub capacity: u32,
    pub price: Option<Credits>,
    pub discount_rules: Vec<DiscountRule>,
    pub requires_approval: bool,
    pub booking_window: Option<BookingWindow>,
    pub cancellation_window_hours: Option<i64>,
    pub refund_inside_window: RefundPolicy,
}

/// Physical location where instances take place.
#[derive(Debug, Clone, PartialEq)]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
    pub address: String,
    pub coords: Option<(f64, f64)>,
}

/// Template fields copied onto an instance when it is generated, kept in
/// sync by propagation while the instance is still `scheduled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub name: String,
    pub duration_mins: u32,
    pub price: Option<Credits>,
}

/// Venue fields copied onto an instance when it is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSnapshot {
    pub name: String,
    pub address: String,
}

/// One bookable occurrence of a template at a venue.
#[derive(Debug, Clone)]
pub struct ScheduledInstance {
    pub id: InstanceId,
    pub template: TemplateId,
    pub venue: VenueId,
    pub business: BusinessId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: u32,
    /// Denormalized count of active reservations; `0 <= booked_count <= capacity`.
    pub booked_count: u32,
    pub status: InstanceStatus,
    pub disable_bookings: bool,
    pub booking_window: Option<BookingWindow>,
    pub cancellation_window_hours: Option<i64>,
    pub refund_inside_window: RefundPolicy,
    /// Instance-level price; falls back to the template price when `None`.
    pub price: Option<Credits>,
    /// Instance-level rule set; fully replaces the template rules when `Some`.
    pub discount_rules: Option<Vec<DiscountRule>>,
    pub template_snapshot: TemplateSnapshot,
    pub venue_snapshot: VenueSnapshot,
    pub deleted: bool,
}

impl ScheduledInstance {
    pub fn seats_left(&self) -> u32 {
        self.capacity.saturating_sub(self.booked_count)
    }
}

/// User fields snapshotted onto a booking at booking time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub name: String,
}

/// Instance fields snapshotted onto a booking at booking time. Historical:
/// never patched after the booking is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub venue: VenueSnapshot,
}

/// Discount actually applied to a booking: rule name plus the effective
/// deduction (truncated so it never exceeds the base price).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub name: String,
    pub amount: Credits,
}

/// Who initiated a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Consumer,
    Business,
}

/// Cancellation metadata recorded on the booking.
#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub reason: Option<String>,
    pub cancelled_by: CancelledBy,
    pub at: DateTime<Utc>,
}

/// One consumer's claim on a scheduled instance.
#[derive(Debug, Clone)]
pub struct BookingRecord {
    pub id: BookingId,
    pub user: UserId,
    pub instance: InstanceId,
    pub business: BusinessId,
    pub status: BookingStatus,
    pub booked_at: DateTime<Utc>,
    pub original_price: Credits,
    pub final_price: Credits,
    pub applied_discount: Option<AppliedDiscount>,
    pub credits_used: Credits,
    pub idempotency_key: Option<String>,
    pub user_snapshot: UserSnapshot,
    pub instance_snapshot: InstanceSnapshot,
    pub answers: Option<Vec<String>>,
    pub cancellation: Option<Cancellation>,
}

/// A command representing the possible inputs of the engine.
#[derive(Debug, Clone)]
pub enum Command {
    /// Register a consumer.
    RegisterUser { user: UserId, name: String },
    /// Create a template under a business.
    RegisterTemplate {
        template: TemplateId,
        capacity: u32,
        price: Credits,
    },
    /// Create a venue.
    RegisterVenue { venue: VenueId },
    /// Generate one scheduled instance from a template at a venue.
    Schedule {
        instance: InstanceId,
        template: TemplateId,
        venue: VenueId,
        start: DateTime<Utc>,
    },
    /// Credit a user's balance; `external_ref` routes through the idempotent
    /// external-event path.
    TopUp {
        user: UserId,
        amount: Credits,
        external_ref: Option<String>,
        at: DateTime<Utc>,
    },
    /// Reserve a seat.
    Book {
        user: UserId,
        instance: InstanceId,
        at: DateTime<Utc>,
        idempotency_key: Option<String>,
    },
    /// Business approves a booking awaiting confirmation.
    Approve { booking: BookingId, at: DateTime<Utc> },
    /// Business rejects a booking awaiting confirmation; full refund.
    Reject { booking: BookingId, at: DateTime<Utc> },
    /// Consumer cancels their own booking; refund per window policy.
    CancelByConsumer {
        user: UserId,
        booking: BookingId,
        at: DateTime<Utc>,
    },
    /// Business cancels a confirmed booking; full refund.
    CancelByBusiness {
        booking: BookingId,
        rebookable: bool,
        at: DateTime<Utc>,
    },
    /// Mark a confirmed booking as attended.
    Complete { booking: BookingId, at: DateTime<Utc> },
    /// Mark a booking as a no-show; no refund.
    NoShow { booking: BookingId, at: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_status_contract_strings() {
        for (status, expected) in [
            (BookingStatus::AwaitingApproval, "\"awaiting_approval\""),
            (BookingStatus::Pending, "\"pending\""),
            (BookingStatus::Completed, "\"completed\""),
            (BookingStatus::CancelledByConsumer, "\"cancelled_by_consumer\""),
            (BookingStatus::CancelledByBusiness, "\"cancelled_by_business\""),
            (
                BookingStatus::CancelledByBusinessRebookable,
                "\"cancelled_by_business_rebookable\"",
            ),
            (BookingStatus::RejectedByBusiness, "\"rejected_by_business\""),
            (BookingStatus::NoShow, "\"no_show\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
            assert_eq!(format!("\"{}\"", status.as_str()), expected);
        }
    }

    #[test]
    fn instance_status_contract_strings() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Scheduled).unwrap(),
            "\"scheduled\""
        );
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn rebooking_only_after_business_closure() {
        assert!(BookingStatus::CancelledByBusiness.permits_rebooking());
        assert!(BookingStatus::CancelledByBusinessRebookable.permits_rebooking());
        assert!(BookingStatus::RejectedByBusiness.permits_rebooking());
        assert!(!BookingStatus::CancelledByConsumer.permits_rebooking());
        assert!(!BookingStatus::Pending.permits_rebooking());
        assert!(!BookingStatus::AwaitingApproval.permits_rebooking());
        assert!(!BookingStatus::Completed.permits_rebooking());
        assert!(!BookingStatus::NoShow.permits_rebooking());
    }

    #[test]
    fn terminal_states() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::CancelledByConsumer.is_terminal());
        assert!(BookingStatus::NoShow.is_terminal());
        assert!(!BookingStatus::CancelledByBusiness.is_terminal());
        assert!(!BookingStatus::Pending.is_terminal());
    }
}
