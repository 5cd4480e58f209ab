pub mod contact;
pub mod event_grid;
pub mod events;
pub mod hubspot;
pub mod metrics;
pub mod properties;
pub mod queue;
