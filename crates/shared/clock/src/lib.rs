//! Copytrade Clock Infrastructure
//!
//! Time sources for the engine:
//!
//! - [`SystemClock`]: wall-clock time for production
//! - [`ManualClock`]: frozen time that only moves when told to, for
//!   deterministic tests of expiry and daily resets
//!
//! ## Usage
//!
//! ```ignore
//! use copytrade_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::starting_at(start);
//! clock.advance(Duration::hours(25));
//! assert!(signal.is_expired(clock.now()));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use copytrade_ports::Clock;
