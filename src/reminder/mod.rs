pub mod dispatcher;
pub mod policy;
pub mod store;

pub use dispatcher::{DispatchOutcome, ReminderDispatcher, ReminderError};
pub use policy::ReminderKind;
pub use store::{PgReminderStore, ReminderCandidate, ReminderStore};
