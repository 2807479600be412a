pub mod stripe_client;
pub mod stripe_events;
