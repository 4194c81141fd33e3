//! Core engine — the copy-trade lifecycle: resolve → scan → resolve.

pub mod scanner;
pub mod resolver;
pub mod orchestrator;
