//! Stripe Geometry Resolver
//!
//! Pure mapping from array configuration to member-disk placement:
//!
//! ```text
//!   logical offset ──▶ stripe index ──▶ parity disk (and Q disk)
//!                                   └─▶ data ordinal ──▶ physical disk
//! ```
//!
//! The same mapping is used when partial chunks are read back for
//! reconstruction and when parity is written, so the two can never disagree
//! for a given array configuration.

mod resolver;

#[cfg(test)]
mod proptest;

pub use resolver::{DataLocation, StripeDisks, StripeGeometry};
