//! User-authored formulas: grammar, compilation, evaluation and file format.

pub mod compiled;
pub mod expression;
pub mod file;

pub use compiled::{
    CompileError, CompileErrorKind, CompiledFormula, EvalError, EvaluationContext, INPUT_NAME,
    OUTPUT_NAME,
};
pub use expression::{BinaryOp, Expression, ExpressionError, UnaryOp};
pub use file::{format_value, FormulaFile, FormulaFileError, ParameterDeclaration};
