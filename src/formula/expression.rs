//! Expression grammar for the right-hand side of formula statements.
//!
//! The grammar is deliberately small: numeric literals, identifiers, function
//! calls, parentheses, unary sign, and the binary operators `+ - * / ^ **`.
//! Anything else is a parse error, which is what keeps formulas sandboxed.
//!
//! Precedence, lowest first: `+ -`, `* /`, unary sign, power. Power is
//! right-associative, so `-x^2` is `-(x^2)` and `2^3^2` is `2^(3^2)`.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace0, one_of},
    combinator::{not, opt, recognize},
    error::{Error as NomError, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};
use thiserror::Error;

type Res<'a, T> = IResult<&'a str, T>;

/// Error that can occur during expression parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected input at column {column}: '{fragment}'")]
    Unexpected { column: usize, fragment: String },
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant number
    Number(f64),

    /// Variable reference
    Variable(String),

    /// Unary operations
    Unary(UnaryOp, Box<Expression>),

    /// Binary operations
    Binary(BinaryOp, Box<Expression>, Box<Expression>),

    /// Function call
    Function(String, Vec<Expression>),
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    /// Addition (+)
    Add,

    /// Subtraction (-)
    Sub,

    /// Multiplication (*)
    Mul,

    /// Division (/)
    Div,

    /// Power (^ or **)
    Pow,
}

impl Expression {
    /// Parse an expression from a string
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        if input.trim().is_empty() {
            return Err(ExpressionError::Empty);
        }

        match expr(input) {
            Ok((remainder, parsed)) => {
                let rest = remainder.trim_start();
                if rest.is_empty() {
                    Ok(parsed)
                } else {
                    Err(unexpected(input, rest))
                }
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(unexpected(input, e.input)),
            Err(nom::Err::Incomplete(_)) => Err(unexpected(input, "")),
        }
    }

    /// Find all variable names used in the expression, sorted and deduplicated
    pub fn variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.visit_variables(&mut |name| vars.push(name.to_string()));
        vars.sort();
        vars.dedup();
        vars
    }

    /// Walk every variable reference in source order.
    pub fn visit_variables<F: FnMut(&str)>(&self, visit: &mut F) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => visit(name),
            Self::Unary(_, inner) => inner.visit_variables(visit),
            Self::Binary(_, left, right) => {
                left.visit_variables(visit);
                right.visit_variables(visit);
            }
            Self::Function(_, args) => {
                for arg in args {
                    arg.visit_variables(visit);
                }
            }
        }
    }
}

fn unexpected(input: &str, rest: &str) -> ExpressionError {
    let consumed = input.len().saturating_sub(rest.len());
    let fragment: String = rest.trim_start().chars().take(16).collect();
    ExpressionError::Unexpected {
        column: consumed + 1,
        fragment: if fragment.is_empty() {
            "end of input".to_string()
        } else {
            fragment
        },
    }
}

fn ws(input: &str) -> Res<'_, &str> {
    multispace0(input)
}

/// A single punctuation character with optional leading whitespace.
fn symbol<'a>(c: char) -> impl Parser<&'a str, Output = char, Error = NomError<&'a str>> {
    preceded(ws, char(c))
}

/// Identifier: a letter or underscore followed by letters, digits or underscores.
pub(crate) fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

/// Unsigned decimal or scientific literal: `12`, `1.5`, `.5`, `1.5000e+05`.
fn number_literal(input: &str) -> Res<'_, &str> {
    recognize((
        alt((
            recognize((digit1, opt((char('.'), digit0)))),
            recognize((char('.'), digit1)),
        )),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

fn number(input: &str) -> Res<'_, Expression> {
    let (rest, text) = number_literal(input)?;
    match text.parse::<f64>() {
        Ok(value) => Ok((rest, Expression::Number(value))),
        Err(_) => Err(nom::Err::Error(NomError::new(input, ErrorKind::Float))),
    }
}

/// Identifier, optionally followed by a parenthesized argument list.
fn call_or_variable(input: &str) -> Res<'_, Expression> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        symbol('('),
        separated_list0(symbol(','), expr),
        symbol(')'),
    ))
    .parse(input)?;

    let node = match args {
        Some(args) => Expression::Function(name.to_string(), args),
        None => Expression::Variable(name.to_string()),
    };
    Ok((input, node))
}

fn parens(input: &str) -> Res<'_, Expression> {
    delimited(char('('), expr, symbol(')')).parse(input)
}

fn primary(input: &str) -> Res<'_, Expression> {
    let (input, _) = ws(input)?;
    alt((number, call_or_variable, parens)).parse(input)
}

fn power_operator(input: &str) -> Res<'_, &str> {
    preceded(ws, alt((tag("**"), tag("^")))).parse(input)
}

/// primary (pow factor)?
fn power(input: &str) -> Res<'_, Expression> {
    let (input, base) = primary(input)?;
    let (input, exponent) = opt(preceded(power_operator, factor)).parse(input)?;

    let node = match exponent {
        Some(exponent) => Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
        None => base,
    };
    Ok((input, node))
}

fn sign(input: &str) -> Res<'_, Option<char>> {
    opt(one_of("+-")).parse(input)
}

/// Signed power: `-a^b`, `+a`, `--a`.
fn factor(input: &str) -> Res<'_, Expression> {
    let (input, _) = ws(input)?;
    let (after_sign, prefix) = sign(input)?;

    match prefix {
        Some('-') => {
            let (rest, operand) = factor(after_sign)?;
            Ok((rest, Expression::Unary(UnaryOp::Neg, Box::new(operand))))
        }
        Some(_) => factor(after_sign),
        None => power(input),
    }
}

fn multiplicative_operator(input: &str) -> Res<'_, char> {
    // `*` directly followed by another `*` is a power operator, not a product.
    preceded(ws, alt((terminated(char('*'), not(char('*'))), char('/')))).parse(input)
}

fn term(input: &str) -> Res<'_, Expression> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(multiplicative_operator, factor)).parse(input)?;

    let node = rest.into_iter().fold(first, |acc, (op, rhs)| {
        let op = if op == '*' { BinaryOp::Mul } else { BinaryOp::Div };
        Expression::Binary(op, Box::new(acc), Box::new(rhs))
    });
    Ok((input, node))
}

fn additive_operator(input: &str) -> Res<'_, char> {
    preceded(ws, one_of("+-")).parse(input)
}

fn expr(input: &str) -> Res<'_, Expression> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(additive_operator, term)).parse(input)?;

    let node = rest.into_iter().fold(first, |acc, (op, rhs)| {
        let op = if op == '+' { BinaryOp::Add } else { BinaryOp::Sub };
        Expression::Binary(op, Box::new(acc), Box::new(rhs))
    });
    Ok((input, node))
}
