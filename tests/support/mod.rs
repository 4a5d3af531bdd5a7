//! Shared helpers for integration tests.
#![allow(dead_code)]

mod range_server;

pub use range_server::{RangeResponder, deterministic_payload};
