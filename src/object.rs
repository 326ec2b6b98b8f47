use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use crate::ast::{Block, Expression};
use crate::error::{EvalError, EvalResult};

/// Name the pipe value is bound under inside a call environment.
pub const PIPE_VALUE: &str = "🍕";

/// Declarable type tags for function input/return annotations. A closed set
/// mapped both ways to runtime value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    Str,
    Array,
    Hash,
    Null,
    Function,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Bool => "bool",
            TypeTag::Str => "str",
            TypeTag::Array => "array",
            TypeTag::Hash => "hash",
            TypeTag::Null => "null",
            TypeTag::Function => "fn",
        }
    }

    pub fn from_name(name: &str) -> Option<TypeTag> {
        match name {
            "int" => Some(TypeTag::Int),
            "float" => Some(TypeTag::Float),
            "bool" => Some(TypeTag::Bool),
            "str" => Some(TypeTag::Str),
            "array" => Some(TypeTag::Array),
            "hash" => Some(TypeTag::Hash),
            "null" => Some(TypeTag::Null),
            "fn" => Some(TypeTag::Function),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<HashMap<HashKey, Value>>>),
    Function(Rc<FunctionValue>),
    Builtin(Rc<BuiltinFunction>),
    /// Return marker: wraps the value written through `💩 = expr`. Unwrapped
    /// by the caller's invocation logic, short-circuits block evaluation.
    Return(Box<Value>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn hash(entries: HashMap<HashKey, Value>) -> Value {
        Value::Hash(Rc::new(RefCell::new(entries)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Bool(_) => TypeTag::Bool,
            Value::Str(_) => TypeTag::Str,
            Value::Null => TypeTag::Null,
            Value::Array(_) => TypeTag::Array,
            Value::Hash(_) => TypeTag::Hash,
            Value::Function(_) | Value::Builtin(_) => TypeTag::Function,
            Value::Return(inner) => inner.type_tag(),
        }
    }

    /// Only `false` and `null` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(l), Value::Int(r)) => l == r,
            (Value::Float(l), Value::Float(r)) => l == r,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Str(l), Value::Str(r)) => l == r,
            (Value::Null, Value::Null) => true,
            (Value::Array(l), Value::Array(r)) => *l.borrow() == *r.borrow(),
            (Value::Hash(l), Value::Hash(r)) => *l.borrow() == *r.borrow(),
            (Value::Function(l), Value::Function(r)) => Rc::ptr_eq(l, r),
            (Value::Builtin(l), Value::Builtin(r)) => Rc::ptr_eq(l, r),
            (Value::Return(l), Value::Return(r)) => l == r,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Null => write!(f, "null"),
            Value::Array(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(|v| format!("{:?}", v)).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Hash(entries) => {
                let entries = entries.borrow();
                let mut parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {:?}", k, v))
                    .collect();
                parts.sort();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(func) => {
                if func.name.is_empty() {
                    write!(f, "<fn>")
                } else {
                    write!(f, "<fn {}>", func.name)
                }
            }
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name),
            Value::Return(inner) => write!(f, "{}", inner),
        }
    }
}

/// Hashable subset of values usable as hash keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl HashKey {
    pub fn from_value(value: &Value) -> EvalResult<HashKey> {
        match value {
            Value::Int(n) => Ok(HashKey::Int(*n)),
            Value::Str(s) => Ok(HashKey::Str(s.clone())),
            Value::Bool(b) => Ok(HashKey::Bool(*b)),
            other => Err(EvalError::UnsupportedIndexTarget {
                kind: format!("hash with {} key", other.type_tag()),
            }),
        }
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Int(n) => write!(f, "{}", n),
            HashKey::Str(s) => write!(f, "{}", s),
            HashKey::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A runtime function: parameters, shared body block, captured environment,
/// optional type annotations and the optional dispatch condition. The
/// captured environment stays alive as long as the function does (closures
/// outlive their defining scope).
pub struct FunctionValue {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<Block>,
    pub env: Rc<Environment>,
    pub input_type: Option<TypeTag>,
    pub return_type: Option<TypeTag>,
    pub condition: Option<Rc<Expression>>,
}

impl FunctionValue {
    pub fn is_default(&self) -> bool {
        self.condition.is_none()
    }
}

pub struct BuiltinFunction {
    pub name: String,
    pub func: Rc<dyn Fn(&[Value]) -> EvalResult<Value>>,
}

/// All same-named function variants, conditionals in declaration order plus
/// at most one default. The explicit replacement for encoding order and role
/// into suffixed environment keys.
#[derive(Default)]
pub struct DispatchGroup {
    conditionals: Vec<Rc<FunctionValue>>,
    default: Option<Rc<FunctionValue>>,
}

impl DispatchGroup {
    fn contains(&self, func: &Rc<FunctionValue>) -> bool {
        self.conditionals
            .iter()
            .chain(self.default.iter())
            .any(|existing| Rc::ptr_eq(&existing.body, &func.body))
    }

    /// Ordered candidate set: conditionals first, default last.
    pub fn candidates(&self) -> Vec<Rc<FunctionValue>> {
        self.conditionals
            .iter()
            .chain(self.default.iter())
            .cloned()
            .collect()
    }

    /// What the bare name resolves to: the default variant when present,
    /// otherwise the most recently registered conditional.
    fn bare_value(&self) -> Option<Rc<FunctionValue>> {
        self.default
            .clone()
            .or_else(|| self.conditionals.last().cloned())
    }
}

/// Lexically scoped variable store. Children hold a reference to their
/// parent; parents never reference children.
pub struct Environment {
    values: RefCell<HashMap<String, Value>>,
    functions: RefCell<HashMap<String, DispatchGroup>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    pub fn new(parent: Option<Rc<Environment>>) -> Rc<Self> {
        Rc::new(Self {
            values: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
            parent,
        })
    }

    pub fn set(&self, name: String, value: Value) {
        self.values.borrow_mut().insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.borrow().get(name) {
            return Some(value.clone());
        }
        if let Some(func) = self
            .functions
            .borrow()
            .get(name)
            .and_then(DispatchGroup::bare_value)
        {
            return Some(Value::Function(func));
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Register a named function variant. Deduplicated by body identity so
    /// re-registering the same literal (a second pre-registration run, or
    /// runtime re-evaluation of a hoisted declaration) is a no-op.
    pub fn register_function(&self, func: Rc<FunctionValue>) {
        debug_assert!(!func.name.is_empty());
        let mut functions = self.functions.borrow_mut();
        let group = functions.entry(func.name.clone()).or_default();
        if group.contains(&func) {
            return;
        }
        if func.is_default() {
            group.default = Some(func);
        } else {
            group.conditionals.push(func);
        }
    }

    /// Candidate variants for `name` from the nearest scope that declares
    /// any, or None when no scope does.
    pub fn dispatch_candidates(&self, name: &str) -> Option<Vec<Rc<FunctionValue>>> {
        if let Some(group) = self.functions.borrow().get(name) {
            return Some(group.candidates());
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.dispatch_candidates(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn named_fn(env: &Rc<Environment>, name: &str, conditional: bool) -> Rc<FunctionValue> {
        Rc::new(FunctionValue {
            name: name.to_string(),
            params: Vec::new(),
            body: Rc::new(Block {
                statements: Vec::new(),
            }),
            env: Rc::clone(env),
            input_type: None,
            return_type: None,
            condition: conditional.then(|| Rc::new(Expression::Bool(true))),
        })
    }

    #[test]
    fn candidates_keep_declaration_order_with_default_last() {
        let env = Environment::new(None);
        let first = named_fn(&env, "f", true);
        let default = named_fn(&env, "f", false);
        let second = named_fn(&env, "f", true);

        env.register_function(Rc::clone(&first));
        env.register_function(Rc::clone(&default));
        env.register_function(Rc::clone(&second));

        let candidates = env.dispatch_candidates("f").expect("group should exist");
        assert_eq!(candidates.len(), 3);
        assert!(Rc::ptr_eq(&candidates[0], &first));
        assert!(Rc::ptr_eq(&candidates[1], &second));
        assert!(Rc::ptr_eq(&candidates[2], &default));
    }

    #[test]
    fn registering_the_same_literal_twice_is_a_no_op() {
        let env = Environment::new(None);
        let func = named_fn(&env, "g", true);
        env.register_function(Rc::clone(&func));
        env.register_function(Rc::clone(&func));

        let candidates = env.dispatch_candidates("g").expect("group should exist");
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn a_later_default_replaces_the_previous_default() {
        let env = Environment::new(None);
        let old = named_fn(&env, "h", false);
        let new = named_fn(&env, "h", false);
        env.register_function(Rc::clone(&old));
        env.register_function(Rc::clone(&new));

        let candidates = env.dispatch_candidates("h").expect("group should exist");
        assert_eq!(candidates.len(), 1);
        assert!(Rc::ptr_eq(&candidates[0], &new));
    }

    #[test]
    fn bare_name_prefers_the_default_variant() {
        let env = Environment::new(None);
        let conditional = named_fn(&env, "f", true);
        let default = named_fn(&env, "f", false);
        env.register_function(Rc::clone(&conditional));

        match env.get("f") {
            Some(Value::Function(func)) => assert!(Rc::ptr_eq(&func, &conditional)),
            other => panic!("expected conditional variant, got {:?}", other),
        }

        env.register_function(Rc::clone(&default));
        match env.get("f") {
            Some(Value::Function(func)) => assert!(Rc::ptr_eq(&func, &default)),
            other => panic!("expected default variant, got {:?}", other),
        }
    }

    #[test]
    fn lookup_walks_to_the_parent_scope() {
        let root = Environment::new(None);
        root.set("x".to_string(), Value::Int(1));
        let child = Environment::new(Some(Rc::clone(&root)));
        child.set("y".to_string(), Value::Int(2));

        assert_eq!(child.get("x"), Some(Value::Int(1)));
        assert_eq!(child.get("y"), Some(Value::Int(2)));
        assert_eq!(root.get("y"), None);
    }

    #[test]
    fn child_bindings_shadow_the_parent() {
        let root = Environment::new(None);
        root.set("x".to_string(), Value::Int(1));
        let child = Environment::new(Some(Rc::clone(&root)));
        child.set("x".to_string(), Value::Int(9));

        assert_eq!(child.get("x"), Some(Value::Int(9)));
        assert_eq!(root.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn type_tags_round_trip_through_names() {
        for tag in [
            TypeTag::Int,
            TypeTag::Float,
            TypeTag::Bool,
            TypeTag::Str,
            TypeTag::Array,
            TypeTag::Hash,
            TypeTag::Null,
            TypeTag::Function,
        ] {
            assert_eq!(TypeTag::from_name(tag.name()), Some(tag));
        }
        assert_eq!(TypeTag::from_name("integer"), None);
    }
}
