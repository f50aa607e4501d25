//! # Parameter System
//!
//! The scientific model of a session as a tree of typed parameters, together
//! with the constraints that tie them together.
//!
//! ## Core Components
//!
//! - [`Parameter`]: a single value with unit, bounds and fixed/enabled flags
//! - [`ParameterGraph`]: phases, atoms, pattern, instrument and background
//! - [`Bounds`] and [`BoundsTransform`]: parameter ranges and the transform used while fitting
//! - [`ConstraintEngine`]: numeric and object constraints evaluated in insertion order
//! - [`ConstraintExpression`]: text form of a constraint, parsed with nom
//!
//! ## Example Usage
//!
//! ```rust
//! use powderfit_rs::parameters::{ArithmeticOp, Constraint, ConstraintEngine, ParameterGraph};
//!
//! let mut graph = ParameterGraph::default();
//! let scale = graph.find("pattern.scale").unwrap();
//! let wavelength = graph.find("instrument.wavelength").unwrap();
//!
//! let mut constraints = ConstraintEngine::new();
//! let constraint = Constraint::object(scale, 50.0, ArithmeticOp::Mul, wavelength);
//! constraints.add(constraint, &mut graph).unwrap();
//!
//! assert!((graph.get(scale).unwrap().value() - 95.6).abs() < 1e-9);
//! ```

pub mod bounds;
pub mod constraints;
pub mod expression;
pub mod graph;
pub mod parameter;

// Re-export key types
pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use constraints::{ArithmeticOp, Constraint, ConstraintEngine, RelationalOp, ValueChange};
pub use expression::{ConstraintExpression, ExpressionError, Rhs};
pub use graph::{
    AtomSite, Background, BackgroundPoint, GraphEntry, Instrument, Lattice, ParameterGraph,
    Pattern, Phase, Scope, VisibleParameter,
};
pub use parameter::{IdAllocator, ParamId, Parameter};
