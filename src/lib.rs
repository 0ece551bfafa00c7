pub mod credits;
pub mod csv;
pub mod engine;
pub mod jobs;
pub mod ledger;
pub mod model;
pub mod pricing;
pub mod propagation;

pub use credits::Credits;
pub use engine::Engine;
pub use ledger::CreditLedger;
pub use model::{BookingId, BusinessId, Command, InstanceId, TemplateId, UserId, VenueId};
