//! Window clock: window id allocation and lock-step boundary tracking.

mod clock;

pub use clock::*;

#[cfg(test)]
#[path = "tests/clock_tests.rs"]
mod tests;
