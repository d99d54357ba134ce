//! Side-effecting operations: filesystem, subprocess, network.
//!
//! Everything here is isolated behind small seams (traits or narrow
//! structs) so orchestration code can be tested with scripted doubles.

pub mod config;
pub mod llm;
pub mod prompt;
pub mod prompt_log;
pub mod sandbox;
pub mod workspace;
