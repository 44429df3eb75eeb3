//! Mock HAL implementation for testing and development.
//!
//! This module provides a simulated sensor HAL that can be controlled
//! programmatically without requiring physical hardware.

pub mod hal;

// Re-export commonly used types
pub use hal::{HalCall, MOCK_INTERFACE_VERSION, MockHal, MockHalHandle};
