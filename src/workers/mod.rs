//! # Queue Workers
//!
//! Long-running consumers of the work queue lanes. Each worker pops with a
//! bounded wait so that shutdown is observed between items.

pub mod auto_reply;
pub mod delivery;

pub use auto_reply::{AutoReplyOutcome, AutoReplyWorker};
pub use delivery::{DeliveryOutcome, DeliveryWorker};
