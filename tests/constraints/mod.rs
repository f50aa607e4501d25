//! Integration tests for constraints
//!
//! Constraint-driven changes share the undo entry of the edit that caused
//! them, and cyclic constraints are rejected without touching the set.

// Single-entry policy and evaluation
mod evaluation_tests;

// Cycle detection and text parsing
mod validation_tests;
