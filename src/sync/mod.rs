//! Delivery bookkeeping
//!
//! Implements:
//! - Per-direction sequence numbering
//! - 32-packet piggybacked acknowledgment windows and loss detection
//! - Tracking of reliable packets until acknowledged

mod ack;
mod tracker;

pub use ack::*;
pub use tracker::*;
