//! Rollup query entry points.

pub mod rollup;
