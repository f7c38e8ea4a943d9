//! Pure write-path logic: batch grouping and the reconciliation queue.

pub mod grouping;
pub mod pending;
