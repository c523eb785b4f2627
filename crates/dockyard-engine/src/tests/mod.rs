//! Test suites for the dispatch kernel.

mod unit;
