//! dvap-test-harness: test utilities for the DVAP bridge.
//!
//! This crate provides [`MockDvap`] for deterministic testing of device
//! sessions without a DVAP attached, and [`TestPeer`] for driving a relay
//! connection over an in-memory pipe.

pub mod mock_dvap;
pub mod peer;

pub use mock_dvap::{MockDvap, MockDvapHandle, MockEvent};
pub use peer::TestPeer;
