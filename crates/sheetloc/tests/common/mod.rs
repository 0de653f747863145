//! Shared test utilities for sheetloc integration tests.
//!
//! This module provides:
//! - `ScriptedLlm`, a gateway that answers per role from closures
//! - `TestHarness`, a session manager wired to an in-memory sheet
//! - Builders for rows, sheets and configs

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
