use std::fmt;
use std::rc::Rc;

use crate::object::TypeTag;

#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Let { name: String, expr: Expression },
    Expression(Expression),
}

#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Statement>,
}

/// A function literal as written in source. Named literals participate in
/// multi-dispatch; `condition` distinguishes conditional variants from the
/// default variant. The body sits behind `Rc` so the runtime function value
/// shares it and registration can deduplicate by identity.
#[derive(Debug, Clone)]
pub struct FunctionLit {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub input_type: Option<TypeTag>,
    pub return_type: Option<TypeTag>,
    pub condition: Option<Rc<Expression>>,
    pub body: Rc<Block>,
}

#[derive(Debug, Clone)]
pub enum Expression {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    /// The pipe-value literal `🍕`.
    PipeValue,
    /// The secondary-output literal `💩`.
    SecondaryOutput,
    Identifier(String),
    Array(Vec<Expression>),
    Hash(Vec<(Expression, Expression)>),
    Prefix {
        op: PrefixOp,
        right: Box<Expression>,
    },
    Infix {
        left: Box<Expression>,
        op: InfixOp,
        right: Box<Expression>,
    },
    If {
        condition: Box<Expression>,
        consequence: Rc<Block>,
        alternative: Option<Rc<Block>>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    /// `target[start..end]` with either bound optional.
    Slice {
        target: Box<Expression>,
        start: Option<Box<Expression>>,
        end: Option<Box<Expression>>,
    },
    Member {
        object: Box<Expression>,
        property: String,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    Function(Rc<FunctionLit>),
    /// `💩 = expr` — marks the written value as the function's return value.
    ReturnWrite(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Neg,
    Not,
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOp::Neg => write!(f, "-"),
            PrefixOp::Not => write!(f, "!"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Pipe,
    MapPipe,
    FilterPipe,
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Mod => "%",
            InfixOp::Eq => "==",
            InfixOp::NotEq => "!=",
            InfixOp::Lt => "<",
            InfixOp::LtEq => "<=",
            InfixOp::Gt => ">",
            InfixOp::GtEq => ">=",
            InfixOp::And => "&",
            InfixOp::Or => "|",
            InfixOp::Pipe => "|>",
            InfixOp::MapPipe => "+>",
            InfixOp::FilterPipe => "?>",
        };
        write!(f, "{}", text)
    }
}
