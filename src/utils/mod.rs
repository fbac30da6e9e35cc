//! Small shared helpers.

use time::{Date, OffsetDateTime};
use uuid::{NoContext, Timestamp, Uuid};

/// Current wall-clock date in UTC. Lending dates are whole days.
pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Time-ordered identifier for new entities.
pub fn new_id() -> Uuid {
    Uuid::new_v7(Timestamp::now(NoContext))
}
