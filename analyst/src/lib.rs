//! Autonomous data-analysis agent loop.
//!
//! This crate turns a natural-language request into a multi-step plan,
//! executes each step against a stateful code sandbox, recovers from
//! step-level failures by local retry or global re-planning, and validates
//! whether the accumulated results actually answer the original question.
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan decoding, state
//!   ownership, status transitions, context assembly). No I/O, fully
//!   testable in isolation.
//! - **[`io`]**: Side-effecting operations (HTTP completion client,
//!   sandbox subprocess, workspace filesystem, prompt rendering and
//!   logging). Isolated behind seams to enable scripted doubles in tests.
//!
//! Orchestration modules ([`planner`], [`worker`], [`session`]) coordinate
//! core logic with I/O to implement the plan-execute-validate loop.

pub mod core;
pub mod io;
pub mod logging;
pub mod planner;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod worker;
