//! Text form of constraints
//!
//! Constraints can be entered as a single line of text that names parameters by
//! their dotted path:
//!
//! ```text
//! phases.Dichlorine.cell.length_a >= 8.0
//! phases.Dichlorine.cell.length_b = 1 * phases.Dichlorine.cell.length_a
//! phases.Dichlorine.cell.length_c = phases.Dichlorine.cell.length_a
//! ```
//!
//! The grammar is intentionally small: a dependent path, a relational operator
//! and either a number (numeric constraint) or `number <op> path` (object
//! constraint). `=` and `==` are synonyms. A bare path on the right-hand side
//! is shorthand for `1 * path`.

use crate::parameters::constraints::{ArithmeticOp, Constraint, RelationalOp};
use crate::parameters::graph::ParameterGraph;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{multispace0, satisfy},
    combinator::{recognize, value},
    number::complete::double,
    sequence::{delimited, pair},
    IResult, Parser,
};
use thiserror::Error;

/// Error that can occur while parsing or resolving a constraint expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse expression: {message}")]
    ParseError { message: String },

    #[error("Unexpected trailing characters: '{remainder}'")]
    TrailingInput { remainder: String },

    #[error("Unknown parameter path: {path}")]
    UnknownPath { path: String },
}

/// Result type for expression parsing
type ExprResult<T> = Result<T, ExpressionError>;

/// Right-hand side of a parsed constraint
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    /// `<relop> number`
    Number { op: RelationalOp, value: f64 },

    /// `= number <op> path`
    Scaled {
        value: f64,
        op: ArithmeticOp,
        independent: String,
    },
}

/// A parsed, not yet resolved, constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintExpression {
    pub dependent: String,
    pub rhs: Rhs,
}

impl ConstraintExpression {
    /// Parse a constraint from its text form.
    ///
    /// # Examples
    ///
    /// ```
    /// use powderfit_rs::parameters::expression::{ConstraintExpression, Rhs};
    ///
    /// let expr = ConstraintExpression::parse("pattern.scale <= 250").unwrap();
    /// assert_eq!(expr.dependent, "pattern.scale");
    /// assert!(matches!(expr.rhs, Rhs::Number { value, .. } if value == 250.0));
    /// ```
    pub fn parse(input: &str) -> ExprResult<Self> {
        match statement(input.trim()) {
            Ok((remainder, expr)) => {
                if remainder.trim().is_empty() {
                    Ok(expr)
                } else {
                    Err(ExpressionError::TrailingInput {
                        remainder: remainder.trim().to_string(),
                    })
                }
            }
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("{:?}", e),
            }),
        }
    }

    /// Look the paths up in the graph and build an enabled constraint.
    pub fn resolve(&self, graph: &ParameterGraph) -> ExprResult<Constraint> {
        let lookup = |path: &str| {
            graph.find(path).ok_or_else(|| ExpressionError::UnknownPath {
                path: path.to_string(),
            })
        };

        let dependent = lookup(&self.dependent)?;
        Ok(match &self.rhs {
            Rhs::Number { op, value } => Constraint::numeric(dependent, *op, *value),
            Rhs::Scaled {
                value,
                op,
                independent,
            } => Constraint::object(dependent, *value, *op, lookup(independent)?),
        })
    }
}

// Parser functions using nom

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(
        multispace0::<&'a str, nom::error::Error<&'a str>>,
        inner,
        multispace0::<&'a str, nom::error::Error<&'a str>>,
    )
}

fn number(input: &str) -> IResult<&str, f64> {
    double(input)
}

/// Dotted parameter path, e.g. `phases.A.atoms.O1.fract_x` or `background.points[20].y`
fn path(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']')),
    ))
    .parse(input)
}

fn relational_op(input: &str) -> IResult<&str, RelationalOp> {
    alt((
        value(RelationalOp::LessEqual, tag("<=")),
        value(RelationalOp::GreaterEqual, tag(">=")),
        value(RelationalOp::Equal, tag("==")),
        value(RelationalOp::Less, tag("<")),
        value(RelationalOp::Greater, tag(">")),
        value(RelationalOp::Equal, tag("=")),
    ))
    .parse(input)
}

fn arithmetic_op(input: &str) -> IResult<&str, ArithmeticOp> {
    alt((
        value(ArithmeticOp::Mul, tag("*")),
        value(ArithmeticOp::Div, tag("/")),
        value(ArithmeticOp::Add, tag("+")),
        value(ArithmeticOp::Sub, tag("-")),
    ))
    .parse(input)
}

fn statement(input: &str) -> IResult<&str, ConstraintExpression> {
    let (input, dependent) = ws(path).parse(input)?;
    let (input, op) = ws(relational_op).parse(input)?;
    let dependent = dependent.to_string();

    if op == RelationalOp::Equal {
        if let Ok((rest, (value, op, independent))) =
            (ws(number), ws(arithmetic_op), ws(path)).parse(input)
        {
            let rhs = Rhs::Scaled {
                value,
                op,
                independent: independent.to_string(),
            };
            return Ok((rest, ConstraintExpression { dependent, rhs }));
        }
        if let Ok((rest, independent)) = ws(path).parse(input) {
            let rhs = Rhs::Scaled {
                value: 1.0,
                op: ArithmeticOp::Mul,
                independent: independent.to_string(),
            };
            return Ok((rest, ConstraintExpression { dependent, rhs }));
        }
    }

    let (input, value) = ws(number).parse(input)?;
    Ok((
        input,
        ConstraintExpression {
            dependent,
            rhs: Rhs::Number { op, value },
        },
    ))
}
