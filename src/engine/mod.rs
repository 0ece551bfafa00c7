//! Booking lifecycle engine.
//!
//! Owns all persisted state — users, templates, venues, scheduled
//! instances, booking records, the credit ledger — and drives every state
//! transition through one exclusive borrow, so preconditions, the capacity
//! check, the ledger write and the booking write are a single atomic unit.
//! All preconditions are checked before any write; a failed operation
//! leaves no partial state. Also consumes an async stream of commands.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Credits;
use crate::jobs::{Job, JobQueue, Notification, NotificationKind};
use crate::ledger::{Applied, CreditLedger, EntryId, EntryType, Reason};
use crate::model::{
    BookingId, BookingRecord, BookingStatus, CancelledBy, Cancellation, Command, DiscountRule,
    InstanceId, InstanceSnapshot, InstanceStatus, RefundPolicy, ScheduledInstance, Template,
    TemplateId, UserId, UserSnapshot, Venue, VenueId,
};
use crate::pricing;
use crate::propagation::{
    self, TemplateUpdate, VenueUpdate, template_change_affects_snapshots,
    venue_change_affects_snapshots,
};

mod error;
pub use error::{BookError, EngineError, ScheduleError, TransitionError};

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Price charged when neither the instance nor its template sets one.
    pub default_price: Credits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_price: Credits::from_minor(1000),
        }
    }
}

/// Result of a successful (or idempotently replayed) booking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookOutcome {
    pub booking: BookingId,
    pub ledger_entry: EntryId,
    /// True when an idempotency key matched a prior call and the original
    /// result was returned without re-charging.
    pub replayed: bool,
}

/// The booking engine.
pub struct Engine {
    config: EngineConfig,
    users: HashMap<UserId, UserSnapshot>,
    templates: HashMap<TemplateId, Template>,
    venues: HashMap<VenueId, Venue>,
    instances: HashMap<InstanceId, ScheduledInstance>,
    bookings: HashMap<BookingId, BookingRecord>,
    /// Most recent booking per (user, instance), for active-booking dedup.
    latest_booking: HashMap<(UserId, InstanceId), BookingId>,
    /// Prior outcomes by caller-supplied idempotency key.
    idempotency: HashMap<String, (BookingId, EntryId)>,
    ledger: CreditLedger,
    next_booking_id: BookingId,
    next_instance_id: InstanceId,
    jobs: Option<JobQueue>,
}

/// Public API
impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            users: HashMap::new(),
            templates: HashMap::new(),
            venues: HashMap::new(),
            instances: HashMap::new(),
            bookings: HashMap::new(),
            latest_booking: HashMap::new(),
            idempotency: HashMap::new(),
            ledger: CreditLedger::new(),
            next_booking_id: 1,
            next_instance_id: 1,
            jobs: None,
        }
    }

    /// Attach the queue on which side-effect jobs are scheduled.
    pub fn with_jobs(mut self, jobs: JobQueue) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Run the engine with the given command stream.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(cmd) = stream.next().await {
            // any error should not stop the engine, so we just ignore the application result
            let _ = self.apply(cmd);
        }
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn instance(&self, id: InstanceId) -> Option<&ScheduledInstance> {
        self.instances.get(&id)
    }

    pub fn booking(&self, id: BookingId) -> Option<&BookingRecord> {
        self.bookings.get(&id)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &BookingRecord> + '_ {
        self.bookings.values()
    }

    /// Apply a single command on top of the current engine state.
    pub fn apply(&mut self, cmd: Command) -> Result<(), EngineError> {
        match cmd {
            Command::RegisterUser { user, name } => {
                self.register_user(user, name);
            }
            Command::RegisterTemplate {
                template,
                capacity,
                price,
            } => {
                self.register_template(Template {
                    id: template,
                    business: template,
                    name: format!("template-{template}"),
                    duration_mins: 60,
                    capacity,
                    price: Some(price),
                    discount_rules: Vec::new(),
                    requires_approval: false,
                    booking_window: None,
                    cancellation_window_hours: None,
                    refund_inside_window: Default::default(),
                });
            }
            Command::RegisterVenue { venue } => {
                self.register_venue(Venue {
                    id: venue,
                    name: format!("venue-{venue}"),
                    address: String::new(),
                    coords: None,
                });
            }
            Command::Schedule {
                instance,
                template,
                venue,
                start,
            } => {
                let result = self.schedule_instance(instance, template, venue, start);
                Self::log_skip("schedule", &result);
                result?;
            }
            Command::TopUp {
                user,
                amount,
                external_ref,
                at,
            } => match external_ref {
                Some(external_ref) => {
                    self.apply_payment_event(&external_ref, user, amount, at);
                }
                None => {
                    self.purchase_credits(user, amount, at);
                }
            },
            Command::Book {
                user,
                instance,
                at,
                idempotency_key,
            } => {
                let result = self.book(user, instance, at, idempotency_key.as_deref(), None);
                Self::log_skip("book", &result);
                result?;
            }
            Command::Approve { booking, at } => {
                let result = self.approve(booking, at);
                Self::log_skip("approve", &result);
                result?;
            }
            Command::Reject { booking, at } => {
                let result = self.reject(booking, at);
                Self::log_skip("reject", &result);
                result?;
            }
            Command::CancelByConsumer { user, booking, at } => {
                let result = self.cancel_by_consumer(booking, user, None, at);
                Self::log_skip("cancel", &result);
                result?;
            }
            Command::CancelByBusiness {
                booking,
                rebookable,
                at,
            } => {
                let result = self.cancel_by_business(booking, rebookable, None, at);
                Self::log_skip("cancel_business", &result);
                result?;
            }
            Command::Complete { booking, at } => {
                let result = self.complete(booking, at);
                Self::log_skip("complete", &result);
                result?;
            }
            Command::NoShow { booking, at } => {
                let result = self.mark_no_show(booking, at);
                Self::log_skip("no_show", &result);
                result?;
            }
        }
        Ok(())
    }

    pub fn register_user(&mut self, user: UserId, name: String) {
        self.users.insert(user, UserSnapshot { name });
    }

    pub fn register_template(&mut self, template: Template) {
        self.templates.insert(template.id, template);
    }

    pub fn register_venue(&mut self, venue: Venue) {
        self.venues.insert(venue.id, venue);
    }

    /// Credit a user's balance from a direct purchase.
    pub fn purchase_credits(&mut self, user: UserId, amount: Credits, now: DateTime<Utc>) -> EntryId {
        self.ledger
            .credit(user, amount, EntryType::Purchase, Reason::CreditPurchase, now)
    }

    /// Credit a user's balance as a gift grant.
    pub fn gift_credits(&mut self, user: UserId, amount: Credits, now: DateTime<Utc>) -> EntryId {
        self.ledger
            .credit(user, amount, EntryType::Gift, Reason::Gift, now)
    }

    /// Apply a payment-provider webhook event (subscription renewal credit
    /// grant). Idempotent on `external_ref`; safe under at-least-once and
    /// duplicate delivery.
    pub fn apply_payment_event(
        &mut self,
        external_ref: &str,
        user: UserId,
        amount: Credits,
        now: DateTime<Utc>,
    ) -> Applied {
        self.ledger.apply_external_event(
            external_ref,
            user,
            amount,
            EntryType::Purchase,
            Reason::SubscriptionRenewal,
            now,
        )
    }

    /// Generate one scheduled instance from a template at a venue,
    /// snapshotting both as of now.
    pub fn schedule_instance(
        &mut self,
        id: InstanceId,
        template: TemplateId,
        venue: VenueId,
        start: DateTime<Utc>,
    ) -> Result<InstanceId, ScheduleError> {
        if self.instances.contains_key(&id) {
            return Err(ScheduleError::InstanceIdTaken(id));
        }
        let tpl = self
            .templates
            .get(&template)
            .ok_or(ScheduleError::TemplateNotFound(template))?;
        let ven = self
            .venues
            .get(&venue)
            .ok_or(ScheduleError::VenueNotFound(venue))?;

        let instance = ScheduledInstance {
            id,
            template,
            venue,
            business: tpl.business,
            start_time: start,
            end_time: start + Duration::minutes(i64::from(tpl.duration_mins)),
            capacity: tpl.capacity,
            booked_count: 0,
            status: InstanceStatus::Scheduled,
            disable_bookings: false,
            booking_window: tpl.booking_window,
            cancellation_window_hours: tpl.cancellation_window_hours,
            refund_inside_window: tpl.refund_inside_window,
            price: None,
            discount_rules: None,
            template_snapshot: propagation::snapshot_template(tpl),
            venue_snapshot: propagation::snapshot_venue(ven),
            deleted: false,
        };
        self.instances.insert(id, instance);
        self.next_instance_id = self.next_instance_id.max(id + 1);
        Ok(id)
    }

    /// Generate a recurring batch: `count` instances starting at
    /// `first_start`, one every `every`. Ids are assigned sequentially.
    pub fn schedule_recurring(
        &mut self,
        template: TemplateId,
        venue: VenueId,
        first_start: DateTime<Utc>,
        count: u32,
        every: Duration,
    ) -> Result<Vec<InstanceId>, ScheduleError> {
        let mut ids = Vec::with_capacity(count as usize);
        for n in 0..count {
            let id = self.next_instance_id;
            let start = first_start + every * (n as i32);
            ids.push(self.schedule_instance(id, template, venue, start)?);
        }
        Ok(ids)
    }

    /// Reserve a seat on a scheduled instance.
    ///
    /// Preconditions are all checked against persisted state before any
    /// write; the ledger debit, the capacity increment and the booking
    /// insert then happen together. A repeated call with the same
    /// idempotency key replays the original outcome without a second debit.
    pub fn book(
        &mut self,
        user: UserId,
        instance_id: InstanceId,
        now: DateTime<Utc>,
        idempotency_key: Option<&str>,
        answers: Option<Vec<String>>,
    ) -> Result<BookOutcome, BookError> {
        if let Some(key) = idempotency_key {
            if let Some(&(booking, ledger_entry)) = self.idempotency.get(key) {
                info!(user, instance = instance_id, booking, key, "booking replayed");
                return Ok(BookOutcome {
                    booking,
                    ledger_entry,
                    replayed: true,
                });
            }
        }

        let user_snapshot = self
            .users
            .get(&user)
            .cloned()
            .ok_or(BookError::UserNotFound(user))?;
        let instance = self
            .instances
            .get(&instance_id)
            .filter(|i| !i.deleted)
            .ok_or(BookError::InstanceNotFound(instance_id))?;

        if instance.status != InstanceStatus::Scheduled || instance.disable_bookings {
            return Err(BookError::InstanceNotBookable(instance_id));
        }
        if let Some(window) = instance.booking_window {
            let opens = instance.start_time - Duration::hours(window.max_hours);
            let closes = instance.start_time - Duration::hours(window.min_hours);
            if now < opens || now > closes {
                return Err(BookError::BookingWindowClosed(instance_id));
            }
        }
        if instance.booked_count >= instance.capacity {
            return Err(BookError::CapacityExceeded(instance_id, instance.capacity));
        }
        if let Some(&prior) = self.latest_booking.get(&(user, instance_id)) {
            if let Some(prior_record) = self.bookings.get(&prior) {
                if !prior_record.status.permits_rebooking() {
                    return Err(BookError::DuplicateActiveBooking {
                        user,
                        instance: instance_id,
                        booking: prior,
                    });
                }
            }
        }

        // Price from the instance's own fields (template as fallback), not
        // from the snapshot: snapshots are for display and history.
        let template = self.templates.get(&instance.template);
        let base_price = instance
            .price
            .or(template.and_then(|t| t.price))
            .unwrap_or(self.config.default_price);
        let empty: Vec<DiscountRule> = Vec::new();
        let rules = instance
            .discount_rules
            .as_deref()
            .or(template.map(|t| t.discount_rules.as_slice()))
            .unwrap_or(&empty);
        let hours_until_start =
            (instance.start_time - now).num_minutes() as f64 / 60.0;
        let quote = pricing::evaluate(base_price, rules, hours_until_start);

        let status = if template.is_some_and(|t| t.requires_approval) {
            BookingStatus::AwaitingApproval
        } else {
            BookingStatus::Pending
        };
        let instance_snapshot = InstanceSnapshot {
            name: instance.template_snapshot.name.clone(),
            start_time: instance.start_time,
            end_time: instance.end_time,
            venue: instance.venue_snapshot.clone(),
        };
        let business = instance.business;

        // All preconditions passed; debit, then the infallible writes.
        let booking = self.next_booking_id;
        let ledger_entry =
            self.ledger
                .debit(user, quote.final_price, Reason::BookingCharge(booking), now)?;
        self.next_booking_id += 1;

        if let Some(instance) = self.instances.get_mut(&instance_id) {
            instance.booked_count += 1;
        }
        let record = BookingRecord {
            id: booking,
            user,
            instance: instance_id,
            business,
            status,
            booked_at: now,
            original_price: quote.original_price,
            final_price: quote.final_price,
            credits_used: quote.final_price,
            applied_discount: quote.applied_discount,
            idempotency_key: idempotency_key.map(str::to_string),
            user_snapshot,
            instance_snapshot,
            answers,
            cancellation: None,
        };
        self.bookings.insert(booking, record);
        self.latest_booking.insert((user, instance_id), booking);
        if let Some(key) = idempotency_key {
            self.idempotency
                .insert(key.to_string(), (booking, ledger_entry));
        }

        info!(
            user,
            instance = instance_id,
            booking,
            price = %quote.final_price,
            status = status.as_str(),
            "booking created"
        );
        self.notify(NotificationKind::BookingCreated, booking);

        Ok(BookOutcome {
            booking,
            ledger_entry,
            replayed: false,
        })
    }

    /// Business confirms a booking awaiting approval.
    pub fn approve(&mut self, booking: BookingId, _now: DateTime<Utc>) -> Result<(), TransitionError> {
        let record = Self::record_in(
            &mut self.bookings,
            booking,
            BookingStatus::AwaitingApproval,
            "approve",
        )?;
        record.status = BookingStatus::Pending;
        info!(booking, "booking approved");
        Ok(())
    }

    /// Business rejects a booking awaiting approval: full refund, seat
    /// re-opened.
    pub fn reject(&mut self, booking: BookingId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.close_booking(
            booking,
            BookingStatus::AwaitingApproval,
            BookingStatus::RejectedByBusiness,
            "reject",
            CancelledBy::Business,
            None,
            RefundKind::Full,
            now,
        )?;
        Ok(())
    }

    /// Consumer cancels their own confirmed booking; refund follows the
    /// cancellation-window policy. Returns the refunded amount.
    pub fn cancel_by_consumer(
        &mut self,
        booking: BookingId,
        caller: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Credits, TransitionError> {
        let record = self
            .bookings
            .get(&booking)
            .ok_or(TransitionError::BookingNotFound(booking))?;
        if record.user != caller {
            return Err(TransitionError::NotBookingOwner {
                booking,
                owner: record.user,
                caller,
            });
        }
        self.close_booking(
            booking,
            BookingStatus::Pending,
            BookingStatus::CancelledByConsumer,
            "cancel",
            CancelledBy::Consumer,
            reason,
            RefundKind::WindowPolicy,
            now,
        )
    }

    /// Business cancels a confirmed booking: full refund, seat re-opened.
    /// Returns the refunded amount.
    pub fn cancel_by_business(
        &mut self,
        booking: BookingId,
        rebookable: bool,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Credits, TransitionError> {
        let to = if rebookable {
            BookingStatus::CancelledByBusinessRebookable
        } else {
            BookingStatus::CancelledByBusiness
        };
        self.close_booking(
            booking,
            BookingStatus::Pending,
            to,
            "cancel_business",
            CancelledBy::Business,
            reason,
            RefundKind::Full,
            now,
        )
    }

    /// Mark a confirmed booking as attended.
    pub fn complete(&mut self, booking: BookingId, _now: DateTime<Utc>) -> Result<(), TransitionError> {
        let record =
            Self::record_in(&mut self.bookings, booking, BookingStatus::Pending, "complete")?;
        record.status = BookingStatus::Completed;
        info!(booking, "booking completed");
        Ok(())
    }

    /// Mark a booking as a no-show. No refund, no capacity change.
    pub fn mark_no_show(
        &mut self,
        booking: BookingId,
        _now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let record = self
            .bookings
            .get_mut(&booking)
            .ok_or(TransitionError::BookingNotFound(booking))?;
        match record.status {
            BookingStatus::Pending | BookingStatus::Completed => {
                record.status = BookingStatus::NoShow;
                info!(booking, "booking marked no-show");
                Ok(())
            }
            from => Err(TransitionError::InvalidTransition {
                booking,
                from,
                event: "no_show",
            }),
        }
    }

    /// Acknowledge that a business-cancelled booking may be rebooked.
    /// Ledger no-op; idempotent once acknowledged.
    pub fn allow_rebooking(&mut self, booking: BookingId) -> Result<(), TransitionError> {
        let record = self
            .bookings
            .get_mut(&booking)
            .ok_or(TransitionError::BookingNotFound(booking))?;
        match record.status {
            BookingStatus::CancelledByBusiness => {
                record.status = BookingStatus::CancelledByBusinessRebookable;
                Ok(())
            }
            BookingStatus::CancelledByBusinessRebookable => Ok(()),
            from => Err(TransitionError::InvalidTransition {
                booking,
                from,
                event: "allow_rebooking",
            }),
        }
    }

    /// Business cancels the whole occurrence: every awaiting booking is
    /// rejected, every confirmed one business-cancelled as rebookable, and
    /// the instance is closed.
    pub fn cancel_instance(
        &mut self,
        instance: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        self.ensure_scheduled(instance)?;
        for (id, status) in self.active_bookings_of(instance) {
            let result = match status {
                BookingStatus::AwaitingApproval => self.reject(id, now),
                _ => self.cancel_by_business(id, true, None, now).map(|_| ()),
            };
            debug_assert!(result.is_ok());
        }
        if let Some(inst) = self.instances.get_mut(&instance) {
            inst.status = InstanceStatus::Cancelled;
        }
        info!(instance, "instance cancelled");
        Ok(())
    }

    /// Close out a finished occurrence: confirmed bookings become
    /// `completed`, the instance becomes `completed`.
    pub fn complete_instance(
        &mut self,
        instance: InstanceId,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        self.ensure_scheduled(instance)?;
        for (id, status) in self.active_bookings_of(instance) {
            if status == BookingStatus::Pending {
                let result = self.complete(id, now);
                debug_assert!(result.is_ok());
            }
        }
        if let Some(inst) = self.instances.get_mut(&instance) {
            inst.status = InstanceStatus::Completed;
        }
        info!(instance, "instance completed");
        Ok(())
    }

    /// Soft-delete an instance. The record stays addressable by its
    /// bookings; it just stops being bookable or patchable.
    pub fn soft_delete_instance(&mut self, instance: InstanceId) -> Result<(), ScheduleError> {
        let inst = self
            .instances
            .get_mut(&instance)
            .ok_or(ScheduleError::InstanceNotFound(instance))?;
        inst.deleted = true;
        Ok(())
    }

    /// Edit a template and synchronously re-sync the snapshot of every
    /// still-`scheduled` instance generated from it. Counts, statuses and
    /// booking history are never touched; terminal instances keep their
    /// historical snapshot.
    pub fn update_template(
        &mut self,
        template: TemplateId,
        update: TemplateUpdate,
    ) -> Result<(), ScheduleError> {
        let tpl = self
            .templates
            .get_mut(&template)
            .ok_or(ScheduleError::TemplateNotFound(template))?;
        let old = tpl.clone();
        update.apply(tpl);

        if template_change_affects_snapshots(&old, tpl) {
            let tpl = tpl.clone();
            let mut patched = 0u32;
            for instance in self.instances.values_mut().filter(|i| {
                i.template == template && i.status == InstanceStatus::Scheduled && !i.deleted
            }) {
                propagation::patch_template_snapshot(&mut instance.template_snapshot, &tpl);
                patched += 1;
            }
            info!(template, patched, "template edit propagated");
        }
        Ok(())
    }

    /// Edit a venue and synchronously re-sync dependent instance snapshots.
    /// An address change additionally schedules an async geocoding job,
    /// since the lookup must not block or fail this write.
    pub fn update_venue(&mut self, venue: VenueId, update: VenueUpdate) -> Result<(), ScheduleError> {
        let ven = self
            .venues
            .get_mut(&venue)
            .ok_or(ScheduleError::VenueNotFound(venue))?;
        let old = ven.clone();
        update.apply(ven);
        let address_changed = old.address != ven.address;

        if venue_change_affects_snapshots(&old, ven) {
            let ven = ven.clone();
            let mut patched = 0u32;
            for instance in self.instances.values_mut().filter(|i| {
                i.venue == venue && i.status == InstanceStatus::Scheduled && !i.deleted
            }) {
                propagation::patch_venue_snapshot(&mut instance.venue_snapshot, &ven);
                patched += 1;
            }
            info!(venue, patched, "venue edit propagated");

            if address_changed {
                self.enqueue(Job::Geocode {
                    venue,
                    address: ven.address,
                });
            }
        }
        Ok(())
    }

    /// Patch geocoded coordinates back onto a venue. Called by the
    /// surrounding service when the async lookup completes; carries none of
    /// the engine's transactional guarantees.
    pub fn set_venue_coords(
        &mut self,
        venue: VenueId,
        coords: (f64, f64),
    ) -> Result<(), ScheduleError> {
        let ven = self
            .venues
            .get_mut(&venue)
            .ok_or(ScheduleError::VenueNotFound(venue))?;
        ven.coords = Some(coords);
        Ok(())
    }
}

/// How much of the charge a closing transition refunds.
enum RefundKind {
    Full,
    WindowPolicy,
}

/// Private API
impl Engine {
    /// Small helper to log skipped commands in `apply`.
    fn log_skip<T, E: std::fmt::Display>(op: &str, result: &Result<T, E>) {
        if let Err(e) = result {
            info!(reason = %e, "{op} skipped");
        }
    }

    /// Look up a booking and require it to be in `expected`.
    fn record_in<'a>(
        bookings: &'a mut HashMap<BookingId, BookingRecord>,
        booking: BookingId,
        expected: BookingStatus,
        event: &'static str,
    ) -> Result<&'a mut BookingRecord, TransitionError> {
        let record = bookings
            .get_mut(&booking)
            .ok_or(TransitionError::BookingNotFound(booking))?;
        if record.status != expected {
            return Err(TransitionError::InvalidTransition {
                booking,
                from: record.status,
                event,
            });
        }
        Ok(record)
    }

    /// Shared closing transition: refund, capacity decrement, status and
    /// cancellation metadata, notification. Returns the refunded amount.
    #[allow(clippy::too_many_arguments)]
    fn close_booking(
        &mut self,
        booking: BookingId,
        expected: BookingStatus,
        to: BookingStatus,
        event: &'static str,
        cancelled_by: CancelledBy,
        reason: Option<String>,
        refund_kind: RefundKind,
        now: DateTime<Utc>,
    ) -> Result<Credits, TransitionError> {
        let record = Self::record_in(&mut self.bookings, booking, expected, event)?;
        let user = record.user;
        let instance = record.instance;
        let charged = record.final_price;

        let refund = match refund_kind {
            RefundKind::Full => charged,
            RefundKind::WindowPolicy => self.refund_for(instance, charged, now),
        };
        if refund > Credits::ZERO {
            self.ledger
                .credit(user, refund, EntryType::Refund, Reason::BookingRefund(booking), now);
        }
        if let Some(inst) = self.instances.get_mut(&instance) {
            inst.booked_count = inst.booked_count.saturating_sub(1);
        }
        if let Some(record) = self.bookings.get_mut(&booking) {
            record.status = to;
            record.cancellation = Some(Cancellation {
                reason,
                cancelled_by,
                at: now,
            });
        }
        info!(booking, user, instance, refund = %refund, "{event} applied");
        let kind = match cancelled_by {
            CancelledBy::Consumer => NotificationKind::UserCancelled,
            CancelledBy::Business => NotificationKind::BusinessCancelled,
        };
        self.notify(kind, booking);
        Ok(refund)
    }

    /// Refund for a consumer cancellation at `now`: full outside the
    /// cancellation window (or when none is configured), the instance's
    /// policy inside it.
    fn refund_for(&self, instance: InstanceId, charged: Credits, now: DateTime<Utc>) -> Credits {
        let Some(inst) = self.instances.get(&instance) else {
            return charged;
        };
        let Some(window_hours) = inst.cancellation_window_hours else {
            return charged;
        };
        if now <= inst.start_time - Duration::hours(window_hours) {
            return charged;
        }
        match inst.refund_inside_window {
            RefundPolicy::Full => charged,
            RefundPolicy::None => Credits::ZERO,
            RefundPolicy::Partial(percent) => charged.percent(percent),
        }
    }

    fn ensure_scheduled(&self, instance: InstanceId) -> Result<(), ScheduleError> {
        let inst = self
            .instances
            .get(&instance)
            .filter(|i| !i.deleted)
            .ok_or(ScheduleError::InstanceNotFound(instance))?;
        if inst.status != InstanceStatus::Scheduled {
            return Err(ScheduleError::InstanceClosed(instance));
        }
        Ok(())
    }

    fn active_bookings_of(&self, instance: InstanceId) -> Vec<(BookingId, BookingStatus)> {
        self.bookings
            .values()
            .filter(|b| {
                b.instance == instance
                    && matches!(
                        b.status,
                        BookingStatus::AwaitingApproval | BookingStatus::Pending
                    )
            })
            .map(|b| (b.id, b.status))
            .collect()
    }

    fn notify(&self, kind: NotificationKind, booking: BookingId) {
        let Some(record) = self.bookings.get(&booking) else {
            return;
        };
        self.enqueue(Job::Notify(Notification {
            kind,
            booking,
            user: record.user,
            instance: record.instance,
            business: record.business,
            credits_charged: record.credits_used,
        }));
    }

    fn enqueue(&self, job: Job) {
        if let Some(jobs) = &self.jobs {
            jobs.enqueue(job);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
