use crate::parameters::bounds::BoundsError;
use crate::parameters::expression::ExpressionError;
use crate::parameters::parameter::ParamId;
use thiserror::Error;

/// Error types for the powderfit-rs library.
#[derive(Error, Debug)]
pub enum PowderFitError {
    /// No parameter with this id is registered in the graph.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(ParamId),

    /// The constraint would make a dependent parameter drive another constraint.
    #[error("Cyclic constraint: {0}")]
    CyclicConstraint(String),

    /// Malformed constraint (self reference, bad index, unparsable text).
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// No calculation backend with this name is registered.
    #[error("Unknown calculation backend: {0}")]
    UnknownBackend(String),

    /// No minimizer engine with this name is registered.
    #[error("Unknown minimizer engine: {0}")]
    UnknownEngine(String),

    /// The engine does not offer this method.
    #[error("Minimizer engine '{engine}' has no method '{method}'")]
    UnknownMethod { engine: String, method: String },

    /// The minimizer raised during a fit.
    #[error("Fit failed: {0}")]
    Fit(String),

    /// A fit task is already in flight.
    #[error("A fit is already running")]
    FitAlreadyRunning,

    /// Experiment arrays rejected at load time.
    #[error("Invalid experiment data: {0}")]
    InvalidExperiment(String),

    /// A phase name, atom label or background position is already taken.
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A named object (phase, atom, background point) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error for boundary constraint violations.
    #[error("Bounds error: {0}")]
    Bounds(#[from] BoundsError),

    /// Error while parsing a constraint expression.
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Error indicating a mismatch in array dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error during function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// Invalid input coming from the UI edge.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for powderfit-rs operations.
pub type Result<T> = std::result::Result<T, PowderFitError>;
