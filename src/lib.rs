//! tripwatch - travel-assistance backend.
//!
//! Tracks booked flights end-to-end against an external flight-data
//! provider and drives outbound WhatsApp messaging: adaptive polling,
//! change detection with flap suppression, and exactly-once notification
//! dispatch backed by a durable ledger.

pub mod actions;
pub mod aeroapi_client;
pub mod change_consolidation;
pub mod change_detection;
pub mod commands;
pub mod conversations_repo;
pub mod documents;
pub mod documents_repo;
pub mod flight_status;
pub mod flight_status_repo;
pub mod itineraries;
pub mod itineraries_repo;
pub mod metrics;
pub mod notification_retry;
pub mod notifications;
pub mod notifications_repo;
pub mod notifier;
pub mod orchestrator;
pub mod polling;
pub mod scheduler;
pub mod schema;
pub mod timezones;
pub mod trips;
pub mod trips_repo;
pub mod twilio_client;
pub mod web;

pub use aeroapi_client::{AeroApiClient, FetchOutcome};
pub use flight_status::FlightSnapshot;
pub use notifications::NotificationType;
pub use orchestrator::Orchestrator;
pub use trips::Trip;
