//! # Broadcast Campaigns
//!
//! Recurrence rules and the polling scheduler that claims due campaigns and
//! fans their recipients out onto the delivery lane. Delivery itself is done
//! by [`crate::workers::delivery`].

pub mod recurrence;
pub mod scheduler;

pub use recurrence::{EndCondition, RecurrenceRule};
pub use scheduler::{BroadcastScheduler, personalize};
