//! Test suites for the daemon boot sequence.

pub(crate) mod support;
mod unit;
