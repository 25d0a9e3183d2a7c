//! Shared test utilities for configforge integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated stores under a temp directory
//! - `KubeConfigBuilder` for kubeconfig YAML without hand-written fixtures
//! - `wait_for` for polling asynchronous effects with a deadline

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{wait_for, TestHarness};
