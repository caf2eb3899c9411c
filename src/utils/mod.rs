//! Utility modules
//!
//! Common helpers used across the codebase.

pub mod signal;
pub mod throttle;

pub use signal::AutoResetEvent;
pub use throttle::LogThrottler;
