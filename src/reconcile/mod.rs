//! Reconciliation Engine
//!
//! Brings a partially written chunk group to the point where parity can be
//! computed from the data buffer alone, reading as little as possible.
//!
//! # Algorithm
//!
//! ```text
//!   pending bitmap (1 = not yet written)      column:  0 1 2 3 4 5 6 7
//!   row 0                                              0 0 1 1 1 1 1 1
//!   row 1                                              1 0 0 1 1 1 1 1
//!   row 2                                              1 1 1 1 1 1 1 1
//!                                                      ───────────────
//!   untouched = AND of rows                            0 0 0 1 1 1 1 1
//!   touched   = NOT untouched                          1 1 1 0 0 0 0 0
//!
//!   reads:  row 1 ∩ touched → columns 0..1
//!           row 2 ∩ touched → columns 0..3
//! ```
//!
//! Reads are issued concurrently, all of them are awaited, and the last
//! failure wins. The entry buffer is only filled when every read succeeded.
//! The completed stripe then goes to the configured
//! [`ParityFinalizer`](crate::finalize::ParityFinalizer).

pub mod dispatch;
mod engine;
mod plan;

pub use engine::{ReconcileReport, ReconciliationEngine};
pub use plan::{ReadPlan, ReconstructionRequest};
