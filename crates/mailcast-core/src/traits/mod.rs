//! Collaborator seams the engine is written against.

pub mod alert;
pub mod clock;
pub mod store;
pub mod transport;

pub use alert::OperatorAlert;
pub use clock::{Clock, FixedClock, SystemClock};
pub use store::{AttemptLog, CampaignStore};
pub use transport::{SendReport, Transport};
