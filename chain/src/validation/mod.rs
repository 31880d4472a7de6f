//! Validation predicates used at the system's trust boundaries.
//!
//! - [`document`]: JSON documents against their collection mapping, at
//!   admission time.
//! - [`block`]: blocks received from peers, before they touch a replica
//!   chain.

pub mod block;
pub mod document;

pub use block::{BlockError, verify_block};
pub use document::{DocumentError, validate_document};
