//! tests/mod.rs
mod executor_tests;
mod scheduler_tests;
mod support;
