//! Common utilities for engine integration tests.

#![allow(dead_code)]

pub mod assertions;
pub mod harness;

pub use assertions::*;
pub use harness::{TestEngine, BOX, CELL, UNIT_URL, init_tracing};
