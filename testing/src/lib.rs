//! # svchost Testing
//!
//! Testing utilities for the svchost service host.
//!
//! This crate provides:
//! - Fixture services exercising every lifecycle hook and member kind
//! - Request context builders
//! - Authorization header helpers
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use svchost_testing::fixtures::{ClockService, CounterService};
//!
//! let counter = CounterService::new(Arc::new(ClockService::fixed_default()));
//! assert_eq!(counter.add(2), 2);
//! ```

/// Fixture services
pub mod fixtures;

/// Test helpers and utilities
pub mod helpers;

pub use fixtures::{ClockService, CounterService, EchoService, HookRecorder, Inert};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fixed_clock() {
        let clock = ClockService::fixed_default();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_counter() {
        let counter = CounterService::new(Arc::new(ClockService::fixed_default()));
        assert_eq!(counter.add(1), 1);
        counter.set(10);
        assert_eq!(counter.count(), 10);
    }
}
