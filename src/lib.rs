//! MIMIC — Budget-Constrained Copy-Trade Simulation Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod gateway;
pub mod engine;
pub mod store;
pub mod notify;
