//! Rollup row types and the exact accumulator.

pub mod exact;
pub mod rows;
