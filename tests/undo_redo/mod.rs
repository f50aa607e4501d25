//! Integration tests for the undo/redo history
//!
//! Every committed edit must be revertible value by value, and redo must
//! reproduce the undone state exactly.

// Random edit sequences against undo/redo
mod sequence_tests;

// Structural mutations: phases, atoms, background, experiment
mod structure_tests;
