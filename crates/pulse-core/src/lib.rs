//! Pulse Core — shared domain abstractions.
//!
//! This crate defines the event model, the mergeable partial aggregate
//! states, and the storage traits every other crate depends on. It contains
//! no infrastructure code.

pub mod bucket;
pub mod clock;
pub mod error;
pub mod event;
pub mod partial_state;
pub mod range;
pub mod scan;
pub mod store;
pub mod ttl;
pub mod validation;
