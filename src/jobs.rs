//! Fire-and-forget side-effect jobs.
//!
//! Booking transitions and venue address changes schedule work that needs
//! external I/O (notifications, geocoding). Jobs are enqueued on an
//! unbounded channel and drained by a worker task; they are at-least-once,
//! unordered, and their failure never surfaces to or rolls back the
//! operation that scheduled them.

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::Credits;
use crate::model::{BookingId, BusinessId, InstanceId, UserId, VenueId};

/// Which booking transition a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BookingCreated,
    UserCancelled,
    BusinessCancelled,
}

/// Payload delivered to the external notification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub booking: BookingId,
    pub user: UserId,
    pub instance: InstanceId,
    pub business: BusinessId,
    pub credits_charged: Credits,
}

/// A unit of asynchronous work scheduled by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Notify(Notification),
    /// Recompute coordinates for a venue whose address changed. Requires an
    /// external lookup, so it must not block the triggering write.
    Geocode { venue: VenueId, address: String },
}

/// Sending half of the job channel, held by the engine.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    /// Create a queue plus the receiver to hand to [`run_worker`].
    pub fn unbounded() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Enqueue a job. Never fails the caller: a closed channel is logged
    /// and the job dropped.
    pub fn enqueue(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            warn!(?job, "job channel closed, dropping job");
        }
    }
}

/// External collaborator executing jobs: the notification service and the
/// geocoding lookup.
pub trait JobHandler {
    fn notify(
        &mut self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), JobFailure>> + Send;

    fn geocode(
        &mut self,
        venue: VenueId,
        address: &str,
    ) -> impl Future<Output = Result<(f64, f64), JobFailure>> + Send;
}

/// A retryable job execution failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JobFailure(pub String);

/// Outcome of a geocode job, to be fed back through
/// [`Engine::set_venue_coords`](crate::Engine::set_venue_coords) by the
/// surrounding service, outside the engine's transactional guarantees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeocodeResult {
    pub venue: VenueId,
    pub coords: (f64, f64),
}

const MAX_ATTEMPTS: u32 = 3;

/// Drain the job channel until the engine drops its queue, retrying each
/// job up to three attempts. Returns the geocode results produced so the
/// caller can patch venue coordinates back in.
pub async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    mut handler: impl JobHandler,
) -> Vec<GeocodeResult> {
    let mut geocoded = Vec::new();
    while let Some(job) = receiver.recv().await {
        if let Some(result) = run_one(&job, &mut handler).await {
            geocoded.push(result);
        }
    }
    geocoded
}

async fn run_one(job: &Job, handler: &mut impl JobHandler) -> Option<GeocodeResult> {
    for attempt in 1..=MAX_ATTEMPTS {
        let failure = match job {
            Job::Notify(notification) => match handler.notify(notification).await {
                Ok(()) => return None,
                Err(e) => e,
            },
            Job::Geocode { venue, address } => match handler.geocode(*venue, address).await {
                Ok(coords) => {
                    return Some(GeocodeResult {
                        venue: *venue,
                        coords,
                    });
                }
                Err(e) => e,
            },
        };
        warn!(?job, attempt, reason = %failure, "job attempt failed");
    }
    error!(?job, "job dropped after {MAX_ATTEMPTS} attempts");
    None
}
