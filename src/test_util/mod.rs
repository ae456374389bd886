//! This module contains utilities that are useful for testing code based on reliable multicast
//!  delivery. They are used for testing the delivery core itself, but they are also exported for
//!  application testing.
//!
//! Test utilities are part of the crate's regular (non-#[cfg(test)]) code so that applications'
//!  tests can use them as well.

pub mod node;
pub mod receiver;
pub mod network;
