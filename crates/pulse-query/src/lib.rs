//! Pulse — rollup queries.
//!
//! `query_raw` recomputes rollups exactly from the event store and is bound
//! by the event TTL. `query_fast` finalizes pre-merged aggregate buckets and
//! covers the longer aggregate TTL.

pub mod application;
pub mod domain;
