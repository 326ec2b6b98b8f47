use thiserror::Error;

/// Runtime failures surfaced by the evaluator. Every variant carries enough
/// context to render a message without access to the source text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("pipe value referenced outside a pipeline or function context")]
    UndefinedPipeValue,
    #[error("undefined identifier '{name}'")]
    UndefinedIdentifier { name: String },
    #[error("undefined function '{name}'")]
    UndefinedFunction { name: String },
    #[error("no conditional variant of '{name}' matched and no default exists")]
    NoMatchingConditionalFunction { name: String },
    #[error("type mismatch: {left} {op} {right}")]
    TypeMismatch {
        left: String,
        op: String,
        right: String,
    },
    #[error("unknown operator '{op}' for {operand}")]
    UnknownOperator { op: String, operand: String },
    #[error("cannot index into {kind}")]
    UnsupportedIndexTarget { kind: String },
    #[error("function '{name}' expects {expected} input, received {actual}")]
    InputTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("function '{name}' declares {expected} return type, returned {actual}")]
    ReturnTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("right side of a pipeline must be a function name or call")]
    InvalidPipelineTarget,
    #[error("function '{name}' takes {expected} argument(s), received {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Front-end umbrella error: everything the CLI can hit between reading a
/// source file and finishing evaluation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lex error: {message} (line {line})")]
    Lex { message: String, line: usize },
    #[error("parse error: {message} (line {line})")]
    Parse { message: String, line: usize },
    #[error("runtime error: {0}")]
    Eval(#[from] EvalError),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type EvalResult<T> = std::result::Result<T, EvalError>;

pub fn byte_offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .chars()
        .filter(|&c| c == '\n')
        .count()
        + 1
}
