//! Wire protocol layer shared by the directory and every room
//!
//! This module provides:
//! - length-prefixed frame encoding/decoding
//! - the tagged read result distinguishing data from a closed peer
//! - the ACK/NACK reply tokens of the control protocol

pub mod frame;

// Re-export commonly used types
pub use frame::{Framer, Incoming, ACK, MAX_HEADER_BYTES, NACK};
