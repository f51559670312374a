//! Integration tests for twinsync-sync
//!
//! Drives the whole sync pipeline against an in-memory remote and a real
//! local sync root in a temp dir, and verifies convergence, crash recovery,
//! and the engine's per-location guards.

mod common;

mod test_engine;
mod test_pipeline;
mod test_recovery;
