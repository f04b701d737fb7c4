//! helm-events — a typed, priority-aware pub/sub event bus (spec.md §4.L).
//!
//! CRITICAL events are delivered synchronously with a bounded deadline per
//! subscriber; every other priority is fire-and-forget against a bounded,
//! drop-oldest inbox.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod inbox;

pub use bus::{
    EventBus, PublishReport, SubscriberId, DEFAULT_CRITICAL_DEADLINE, DEFAULT_INBOX_CAPACITY,
};
pub use inbox::{DeliveryOutcome, Inbox};
