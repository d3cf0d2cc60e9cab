//! Eviction policy implementations (replacers).
//!
//! - [`ClockReplacer`] - second-chance CLOCK with caller-supplied victim filter

mod clock;

pub use clock::ClockReplacer;
