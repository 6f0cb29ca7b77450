//! In-process publish/subscribe event bus (C7, §4.7).
//!
//! One `tokio::sync::broadcast` channel carries a tagged [`BusEvent`] enum
//! for the whole process; each subscriber filters by topic itself rather
//! than the bus maintaining per-subscriber registrations, avoiding the
//! listener-explosion pitfall called out in §9.

mod event_bus;

pub use event_bus::{BusEvent, EventBus};
