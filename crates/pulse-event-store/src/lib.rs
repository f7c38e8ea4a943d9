//! Pulse Event Store — append-only storage for raw activity events.
//!
//! Two backends implement `pulse_core::store::EventStore`:
//! an in-memory ordered map and a PostgreSQL table. Both keep events in
//! `(event_time, user_id, batch_id, sequence)` order so range scans and TTL
//! sweeps touch a contiguous prefix or slice.

pub mod memory_event_store;
pub mod pg_event_store;

pub use memory_event_store::MemoryEventStore;
pub use pg_event_store::PgEventStore;
