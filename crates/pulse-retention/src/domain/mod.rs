//! Cohort model and the per-user activity index.

pub mod cohort;
