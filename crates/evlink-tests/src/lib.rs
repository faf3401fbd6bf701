//! Integration tests for the evlink stack
//!
//! End-to-end tests that exercise the full path: link manager lifecycle,
//! ELM327 dialogue, ISO-TP reassembly and metric decoding, all over the
//! mock transport and the simulated ECU in virtual time.
//!
//! # Test Structure
//!
//! - `lifecycle_test.rs` - Connection lifecycle: retries, periodic
//!   reconnection, stop semantics, link drops, mock mode
//! - `catalog_test.rs` - Every catalog command through the adapter
//!   dialogue and frame reassembly

// This crate only contains tests, no library code
