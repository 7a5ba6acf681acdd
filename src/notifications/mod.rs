//! Notification events and their batched delivery.

pub mod events;
pub mod summary;

pub use events::{
    create_investor_relations_event, create_user_specific_notification_event, decide_event_type,
};
pub use summary::{process_notification_events, NotificationScheduler, SummaryOutcome};
