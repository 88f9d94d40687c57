//! config/mod.rs

pub mod engine_config;
