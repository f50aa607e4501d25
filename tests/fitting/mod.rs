//! Integration tests for fitting
//!
//! These tests run complete fits through the session on synthetic patterns.

// End-to-end fits and write-back
mod fit_tests;

// Orchestration: concurrency guard, failures, engines and backends
mod orchestration_tests;
