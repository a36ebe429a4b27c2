//! Group membership and the background loops layered on node state
//!
//! Provides the membership view, leader failure detection, and the
//! simulated crash/recovery loop.

pub mod membership;
pub mod failure_detection;
pub mod recovery;

pub use membership::*;
pub use failure_detection::*;
pub use recovery::*;
