//! Cross-crate integration tests for the federation relay
//!
//! This test suite validates:
//! - The two-federation end-to-end flow (register, score, create, relay, audit)
//! - Relay rejections: signature, trust bar, replay, policy
//! - Audit cycles: Merkle inclusion, global-root determinism, count correction
//! - Concurrent registry, relay and audit access
//! - Restart durability over the SQLite store

pub mod test_utils;

#[cfg(test)]
mod end_to_end_tests;

#[cfg(test)]
mod relay_security_tests;

#[cfg(test)]
mod audit_cycle_tests;

#[cfg(test)]
mod concurrency_tests;

#[cfg(test)]
mod durability_tests;
