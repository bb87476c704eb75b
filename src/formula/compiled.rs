//! Compilation of multi-line formulas into evaluable programs.
//!
//! A formula is a sequence of assignments, one per line:
//!
//! ```text
//! # comment
//! k = exp(-deltaG0 / (R * T))
//! y = SN + slopeN * x + k
//! ```
//!
//! Every identifier is resolved once, at compile time, to one of: the input
//! `x`, a parameter slot, an intermediate slot, or the constant `pi`. The
//! resulting program is a small tree-walking interpreter over resolved nodes, so
//! evaluation never looks anything up by name.
//!
//! Evaluation never fails for numeric reasons. Any operation that produces a
//! non-finite value (log of a negative number, division by zero, overflow)
//! yields NaN at that point, and NaN propagates through the rest of the formula.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use ndarray::Array1;
use thiserror::Error;

use super::expression::{identifier, BinaryOp, Expression, ExpressionError, UnaryOp};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Input arrays at least this long are evaluated on the rayon pool.
#[cfg(feature = "parallel")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Name of the independent variable.
pub const INPUT_NAME: &str = "x";

/// Name of the dependent variable; the last statement must assign it.
pub const OUTPUT_NAME: &str = "y";

/// Lookup of named scalar values used to bind parameters at evaluation time.
pub trait EvaluationContext {
    /// Value of `name`, if the context knows it.
    fn get_variable(&self, name: &str) -> Option<f64>;
}

impl EvaluationContext for HashMap<String, f64> {
    fn get_variable(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl EvaluationContext for HashMap<&str, f64> {
    fn get_variable(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// What went wrong while compiling a formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("formula has no statements")]
    Empty,

    #[error("expected '<name> = <expression>'")]
    MalformedStatement,

    #[error("'{name}' is not a valid assignment target")]
    InvalidTarget { name: String },

    #[error("the input variable 'x' cannot be assigned")]
    AssignToInput,

    #[error("'{name}' is a parameter and cannot be assigned")]
    AssignToParameter { name: String },

    #[error("the output variable 'y' cannot be read")]
    ReadOutput,

    #[error("'y' must be assigned by the last statement only")]
    OutputNotLast,

    #[error("the last statement must assign 'y'")]
    MissingOutput,

    #[error("'{name}' is read before it is assigned")]
    UseBeforeAssignment { name: String },

    #[error("undeclared name '{name}'")]
    UndeclaredName { name: String },

    #[error("'{name}' cannot be used as a parameter name")]
    ReservedName { name: String },

    #[error("parameter '{name}' is declared more than once")]
    DuplicateParameter { name: String },

    #[error("function '{name}' is not allowed")]
    DisallowedFunction { name: String },

    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    WrongArity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("syntax error: {0}")]
    Syntax(ExpressionError),
}

/// A compile failure, tied to the offending line.
///
/// `line` is 1-based and counts blank and comment lines; it is 0 for problems
/// that concern the formula as a whole.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct CompileError {
    pub line: usize,
    pub text: String,
    pub kind: CompileErrorKind,
}

impl CompileError {
    fn new(line: usize, text: &str, kind: CompileErrorKind) -> Self {
        Self {
            line,
            text: text.to_string(),
            kind,
        }
    }

    fn whole(kind: CompileErrorKind) -> Self {
        Self::new(0, "", kind)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "line {}: {} (in `{}`)", self.line, self.kind, self.text)
        }
    }
}

/// Failure to bind a compiled formula to parameter values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("no value supplied for parameter '{name}'")]
    MissingParameter { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

/// The allow-list of callable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Exp,
    Ln,
    Log10,
    Log2,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Abs,
    Pow,
    Min,
    Max,
    Floor,
    Ceil,
    Sign,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        let builtin = match name {
            "exp" => Self::Exp,
            "log" | "ln" => Self::Ln,
            "log10" => Self::Log10,
            "log2" => Self::Log2,
            "sqrt" => Self::Sqrt,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" | "arcsin" => Self::Asin,
            "acos" | "arccos" => Self::Acos,
            "atan" | "arctan" => Self::Atan,
            "atan2" => Self::Atan2,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "abs" => Self::Abs,
            "pow" | "power" => Self::Pow,
            "min" => Self::Min,
            "max" => Self::Max,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "sign" => Self::Sign,
            _ => return None,
        };
        Some(builtin)
    }

    fn arity(self) -> Arity {
        match self {
            Self::Atan2 | Self::Pow => Arity::Exact(2),
            Self::Min | Self::Max => Arity::AtLeast(1),
            _ => Arity::Exact(1),
        }
    }

    fn apply1(self, a: f64) -> f64 {
        match self {
            Self::Exp => a.exp(),
            Self::Ln => a.ln(),
            Self::Log10 => a.log10(),
            Self::Log2 => a.log2(),
            Self::Sqrt => a.sqrt(),
            Self::Sin => a.sin(),
            Self::Cos => a.cos(),
            Self::Tan => a.tan(),
            Self::Asin => a.asin(),
            Self::Acos => a.acos(),
            Self::Atan => a.atan(),
            Self::Sinh => a.sinh(),
            Self::Cosh => a.cosh(),
            Self::Tanh => a.tanh(),
            Self::Abs => a.abs(),
            Self::Floor => a.floor(),
            Self::Ceil => a.ceil(),
            Self::Sign => {
                if a.is_nan() {
                    f64::NAN
                } else if a == 0.0 {
                    0.0
                } else {
                    a.signum()
                }
            }
            // min/max of a single argument
            Self::Min | Self::Max => a,
            Self::Atan2 | Self::Pow => f64::NAN,
        }
    }

    fn apply2(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Atan2 => a.atan2(b),
            Self::Pow => a.powf(b),
            Self::Min | Self::Max if a.is_nan() || b.is_nan() => f64::NAN,
            Self::Min => a.min(b),
            Self::Max => a.max(b),
            _ => f64::NAN,
        }
    }
}

/// Expression tree with every name resolved to a slot.
#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Input,
    Param(usize),
    Local(usize),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Builtin, Vec<Node>),
}

#[inline]
fn finite_or_nan(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::NAN
    }
}

impl Node {
    fn eval(&self, x: f64, params: &[f64], locals: &[f64]) -> f64 {
        match self {
            Node::Const(value) => *value,
            Node::Input => x,
            Node::Param(idx) => params.get(*idx).copied().unwrap_or(f64::NAN),
            Node::Local(idx) => locals[*idx],
            Node::Neg(inner) => -inner.eval(x, params, locals),
            Node::Binary(op, left, right) => {
                let a = left.eval(x, params, locals);
                let b = right.eval(x, params, locals);
                let value = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Pow => a.powf(b),
                };
                finite_or_nan(value)
            }
            Node::Call(func, args) => {
                let value = match args.as_slice() {
                    [a] => func.apply1(a.eval(x, params, locals)),
                    [a, b] => func.apply2(a.eval(x, params, locals), b.eval(x, params, locals)),
                    _ => args
                        .iter()
                        .map(|arg| arg.eval(x, params, locals))
                        .reduce(|acc, v| func.apply2(acc, v))
                        .unwrap_or(f64::NAN),
                };
                finite_or_nan(value)
            }
        }
    }
}

#[derive(Debug)]
struct Program {
    assignments: Vec<(usize, Node)>,
    output: Node,
    local_count: usize,
}

impl Program {
    fn run(&self, x: f64, params: &[f64], locals: &mut [f64]) -> f64 {
        for (slot, node) in &self.assignments {
            locals[*slot] = node.eval(x, params, locals);
        }
        self.output.eval(x, params, locals)
    }
}

/// One `<target> = <expression>` line after parsing.
struct Statement<'a> {
    line: usize,
    text: &'a str,
    target: &'a str,
    expr: Expression,
}

fn parse_statements(source: &str) -> Result<Vec<Statement<'_>>, CompileError> {
    let mut statements = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let (lhs, rhs) = text
            .split_once('=')
            .ok_or_else(|| CompileError::new(line, text, CompileErrorKind::MalformedStatement))?;

        let target = lhs.trim();
        match identifier(target) {
            Ok((rest, _)) if rest.is_empty() => {}
            _ => {
                return Err(CompileError::new(
                    line,
                    text,
                    CompileErrorKind::InvalidTarget {
                        name: target.to_string(),
                    },
                ))
            }
        }
        if target == INPUT_NAME {
            return Err(CompileError::new(line, text, CompileErrorKind::AssignToInput));
        }

        let expr = Expression::parse(rhs)
            .map_err(|e| CompileError::new(line, text, CompileErrorKind::Syntax(e)))?;

        statements.push(Statement {
            line,
            text,
            target,
            expr,
        });
    }

    if statements.is_empty() {
        return Err(CompileError::whole(CompileErrorKind::Empty));
    }

    let last = statements.len() - 1;
    for (idx, stmt) in statements.iter().enumerate() {
        if stmt.target == OUTPUT_NAME && idx != last {
            return Err(CompileError::new(
                stmt.line,
                stmt.text,
                CompileErrorKind::OutputNotLast,
            ));
        }
    }
    let final_stmt = &statements[last];
    if final_stmt.target != OUTPUT_NAME {
        return Err(CompileError::new(
            final_stmt.line,
            final_stmt.text,
            CompileErrorKind::MissingOutput,
        ));
    }

    Ok(statements)
}

/// A formula compiled into a reusable, thread-safe program.
///
/// Cloning is cheap; clones share the compiled program.
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    source: String,
    parameters: Vec<String>,
    intermediates: Vec<String>,
    program: Arc<Program>,
}

impl CompiledFormula {
    /// Compile `source`, treating every free identifier as a parameter.
    ///
    /// Parameters are listed in order of first appearance. `pi` is a constant
    /// unless it is assigned as an intermediate.
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let statements = parse_statements(source)?;
        let targets = assignment_targets(&statements);

        let mut parameters: Vec<String> = Vec::new();
        for stmt in &statements {
            stmt.expr.visit_variables(&mut |name| {
                if is_free(name, &targets)
                    && name != "pi"
                    && !parameters.iter().any(|p| p == name)
                {
                    parameters.push(name.to_string());
                }
            });
        }

        Self::build(source, &statements, &targets, parameters)
    }

    /// Compile `source` against an explicit parameter list.
    ///
    /// Every free identifier must be declared (or be the constant `pi`), and no
    /// declared parameter may be assigned. The resulting
    /// [`parameter_names`](Self::parameter_names) keeps the declared order but
    /// only lists parameters the formula actually reads.
    pub fn compile_with_parameters<S: AsRef<str>>(
        source: &str,
        declared: &[S],
    ) -> Result<Self, CompileError> {
        let mut seen = HashSet::new();
        for name in declared {
            let name = name.as_ref();
            if name == INPUT_NAME || name == OUTPUT_NAME {
                return Err(CompileError::whole(CompileErrorKind::ReservedName {
                    name: name.to_string(),
                }));
            }
            if !seen.insert(name) {
                return Err(CompileError::whole(CompileErrorKind::DuplicateParameter {
                    name: name.to_string(),
                }));
            }
        }

        let statements = parse_statements(source)?;
        for stmt in &statements {
            if seen.contains(stmt.target) {
                return Err(CompileError::new(
                    stmt.line,
                    stmt.text,
                    CompileErrorKind::AssignToParameter {
                        name: stmt.target.to_string(),
                    },
                ));
            }
        }
        let targets = assignment_targets(&statements);

        let mut referenced = HashSet::new();
        for stmt in &statements {
            let mut undeclared = None;
            stmt.expr.visit_variables(&mut |name| {
                if !is_free(name, &targets) {
                    return;
                }
                if seen.contains(name) {
                    referenced.insert(name.to_string());
                } else if name != "pi" && undeclared.is_none() {
                    undeclared = Some(name.to_string());
                }
            });
            if let Some(name) = undeclared {
                return Err(CompileError::new(
                    stmt.line,
                    stmt.text,
                    CompileErrorKind::UndeclaredName { name },
                ));
            }
        }

        let parameters = declared
            .iter()
            .map(|name| name.as_ref().to_string())
            .filter(|name| referenced.contains(name))
            .collect();

        Self::build(source, &statements, &targets, parameters)
    }

    fn build(
        source: &str,
        statements: &[Statement<'_>],
        targets: &HashSet<&str>,
        parameters: Vec<String>,
    ) -> Result<Self, CompileError> {
        let (intermediates, assignments, output) =
            Self::resolve_statements(statements, targets, &parameters)?;

        Ok(Self {
            source: source.to_string(),
            parameters,
            program: Arc::new(Program {
                assignments,
                output,
                local_count: intermediates.len(),
            }),
            intermediates,
        })
    }

    #[allow(clippy::type_complexity)]
    fn resolve_statements(
        statements: &[Statement<'_>],
        targets: &HashSet<&str>,
        parameters: &[String],
    ) -> Result<(Vec<String>, Vec<(usize, Node)>, Node), CompileError> {
        let param_index: HashMap<&str, usize> = parameters
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut intermediates: Vec<String> = Vec::new();
        let mut assigned: HashMap<&str, usize> = HashMap::new();
        let mut assignments = Vec::new();
        let mut output = None;

        for stmt in statements {
            let resolver = Resolver {
                targets,
                assigned: &assigned,
                params: &param_index,
            };
            let node = resolver
                .resolve(&stmt.expr)
                .map_err(|kind| CompileError::new(stmt.line, stmt.text, kind))?;

            if stmt.target == OUTPUT_NAME {
                output = Some(node);
                continue;
            }

            let slot = match assigned.get(stmt.target) {
                Some(&slot) => slot,
                None => {
                    let slot = intermediates.len();
                    intermediates.push(stmt.target.to_string());
                    assigned.insert(stmt.target, slot);
                    slot
                }
            };
            assignments.push((slot, node));
        }

        let output = output.ok_or_else(|| CompileError::whole(CompileErrorKind::MissingOutput))?;
        Ok((intermediates, assignments, output))
    }

    /// The formula text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parameters read by the formula, in slot order.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameters
    }

    /// Intermediate names, in order of first assignment.
    pub fn intermediate_names(&self) -> &[String] {
        &self.intermediates
    }

    /// Whether the formula reads parameter `name`.
    pub fn uses_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p == name)
    }

    /// Resolve parameter values from `context`, in slot order.
    pub fn bind<C: EvaluationContext + ?Sized>(&self, context: &C) -> Result<Vec<f64>, EvalError> {
        self.parameters
            .iter()
            .map(|name| {
                context
                    .get_variable(name)
                    .ok_or_else(|| EvalError::MissingParameter { name: name.clone() })
            })
            .collect()
    }

    /// Evaluate at every element of `x`, binding parameters by name.
    pub fn evaluate<C: EvaluationContext + ?Sized>(
        &self,
        x: &Array1<f64>,
        context: &C,
    ) -> Result<Array1<f64>, EvalError> {
        let values = self.bind(context)?;
        Ok(self.evaluate_values(x, &values))
    }

    /// Evaluate at a single point, binding parameters by name.
    pub fn evaluate_scalar<C: EvaluationContext + ?Sized>(
        &self,
        x: f64,
        context: &C,
    ) -> Result<f64, EvalError> {
        let values = self.bind(context)?;
        Ok(self.evaluate_point(x, &values))
    }

    /// Evaluate at every element of `x` with parameter values in slot order.
    ///
    /// A missing trailing value reads as NaN.
    pub fn evaluate_values(&self, x: &Array1<f64>, params: &[f64]) -> Array1<f64> {
        let xs: Cow<'_, [f64]> = match x.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(x.to_vec()),
        };
        let program = &self.program;

        #[cfg(feature = "parallel")]
        if xs.len() >= PARALLEL_THRESHOLD {
            let ys: Vec<f64> = xs
                .par_iter()
                .map_init(
                    || vec![0.0; program.local_count],
                    |locals, &xi| program.run(xi, params, locals),
                )
                .collect();
            return Array1::from_vec(ys);
        }

        let mut locals = vec![0.0; program.local_count];
        let ys: Vec<f64> = xs
            .iter()
            .map(|&xi| program.run(xi, params, &mut locals))
            .collect();
        Array1::from_vec(ys)
    }

    /// Evaluate at a single point with parameter values in slot order.
    pub fn evaluate_point(&self, x: f64, params: &[f64]) -> f64 {
        let mut locals = vec![0.0; self.program.local_count];
        self.program.run(x, params, &mut locals)
    }
}

fn assignment_targets<'a>(statements: &[Statement<'a>]) -> HashSet<&'a str> {
    statements
        .iter()
        .map(|stmt| stmt.target)
        .filter(|target| *target != OUTPUT_NAME)
        .collect()
}

/// True for identifiers that are neither the input, the output nor an intermediate.
fn is_free(name: &str, targets: &HashSet<&str>) -> bool {
    name != INPUT_NAME && name != OUTPUT_NAME && !targets.contains(name)
}

struct Resolver<'r, 'a> {
    targets: &'r HashSet<&'a str>,
    assigned: &'r HashMap<&'a str, usize>,
    params: &'r HashMap<&'r str, usize>,
}

impl Resolver<'_, '_> {
    fn resolve(&self, expr: &Expression) -> Result<Node, CompileErrorKind> {
        match expr {
            Expression::Number(value) => Ok(Node::Const(*value)),
            Expression::Variable(name) => self.resolve_name(name),
            Expression::Unary(UnaryOp::Neg, inner) => Ok(Node::Neg(Box::new(self.resolve(inner)?))),
            Expression::Binary(op, left, right) => Ok(Node::Binary(
                *op,
                Box::new(self.resolve(left)?),
                Box::new(self.resolve(right)?),
            )),
            Expression::Function(name, args) => {
                let func = Builtin::lookup(name)
                    .ok_or_else(|| CompileErrorKind::DisallowedFunction { name: name.clone() })?;
                let arity = func.arity();
                if !arity.accepts(args.len()) {
                    return Err(CompileErrorKind::WrongArity {
                        name: name.clone(),
                        expected: arity.to_string(),
                        found: args.len(),
                    });
                }
                let args = args
                    .iter()
                    .map(|arg| self.resolve(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::Call(func, args))
            }
        }
    }

    fn resolve_name(&self, name: &str) -> Result<Node, CompileErrorKind> {
        if name == INPUT_NAME {
            return Ok(Node::Input);
        }
        if name == OUTPUT_NAME {
            return Err(CompileErrorKind::ReadOutput);
        }
        if self.targets.contains(name) {
            return self
                .assigned
                .get(name)
                .map(|&slot| Node::Local(slot))
                .ok_or_else(|| CompileErrorKind::UseBeforeAssignment {
                    name: name.to_string(),
                });
        }
        if let Some(&idx) = self.params.get(name) {
            return Ok(Node::Param(idx));
        }
        if name == "pi" {
            return Ok(Node::Const(std::f64::consts::PI));
        }
        Err(CompileErrorKind::UndeclaredName {
            name: name.to_string(),
        })
    }
}
