use std::{collections::HashMap, rc::Rc};

use log::debug;

use crate::error::{EvalError, EvalResult};
use crate::object::{BuiltinFunction, HashKey, TypeTag, Value};

/// Host-provided operations, populated once at startup. A hosting layer may
/// add or override names before evaluation starts.
pub struct Builtins {
    table: HashMap<String, Rc<BuiltinFunction>>,
}

impl Builtins {
    pub fn new() -> Self {
        let mut builtins = Self {
            table: HashMap::new(),
        };
        builtins.install_defaults();
        builtins
    }

    pub fn get(&self, name: &str) -> Option<Rc<BuiltinFunction>> {
        self.table.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Add or override a builtin by name.
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> EvalResult<Value> + 'static,
    {
        self.table.insert(
            name.to_string(),
            Rc::new(BuiltinFunction {
                name: name.to_string(),
                func: Rc::new(func),
            }),
        );
    }

    fn install_defaults(&mut self) {
        self.register("len", |args| {
            expect_arity("len", 1, args)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Array(items) => Ok(Value::Int(items.borrow().len() as i64)),
                Value::Hash(entries) => Ok(Value::Int(entries.borrow().len() as i64)),
                other => Err(wrong_input("len", TypeTag::Array, other)),
            }
        });

        self.register("first", |args| {
            expect_arity("first", 1, args)?;
            match &args[0] {
                Value::Array(items) => {
                    Ok(items.borrow().first().cloned().unwrap_or(Value::Null))
                }
                other => Err(wrong_input("first", TypeTag::Array, other)),
            }
        });

        self.register("last", |args| {
            expect_arity("last", 1, args)?;
            match &args[0] {
                Value::Array(items) => {
                    Ok(items.borrow().last().cloned().unwrap_or(Value::Null))
                }
                other => Err(wrong_input("last", TypeTag::Array, other)),
            }
        });

        self.register("rest", |args| {
            expect_arity("rest", 1, args)?;
            match &args[0] {
                Value::Array(items) => {
                    let items = items.borrow();
                    if items.is_empty() {
                        Ok(Value::Null)
                    } else {
                        Ok(Value::array(items[1..].to_vec()))
                    }
                }
                other => Err(wrong_input("rest", TypeTag::Array, other)),
            }
        });

        self.register("push", |args| {
            expect_arity("push", 2, args)?;
            match &args[0] {
                Value::Array(items) => {
                    let mut copied = items.borrow().clone();
                    copied.push(args[1].clone());
                    Ok(Value::array(copied))
                }
                other => Err(wrong_input("push", TypeTag::Array, other)),
            }
        });

        self.register("reverse", |args| {
            expect_arity("reverse", 1, args)?;
            match &args[0] {
                Value::Array(items) => {
                    let mut copied = items.borrow().clone();
                    copied.reverse();
                    Ok(Value::array(copied))
                }
                Value::Str(s) => Ok(Value::Str(s.chars().rev().collect())),
                other => Err(wrong_input("reverse", TypeTag::Array, other)),
            }
        });

        self.register("join", |args| {
            expect_arity("join", 2, args)?;
            let separator = match &args[1] {
                Value::Str(s) => s.clone(),
                other => return Err(wrong_input("join", TypeTag::Str, other)),
            };
            match &args[0] {
                Value::Array(items) => {
                    let parts: Vec<String> =
                        items.borrow().iter().map(|v| v.to_string()).collect();
                    Ok(Value::Str(parts.join(&separator)))
                }
                other => Err(wrong_input("join", TypeTag::Array, other)),
            }
        });

        self.register("split", |args| {
            expect_arity("split", 2, args)?;
            match (&args[0], &args[1]) {
                (Value::Str(s), Value::Str(sep)) => {
                    let parts: Vec<Value> = if sep.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str())
                            .map(|p| Value::Str(p.to_string()))
                            .collect()
                    };
                    Ok(Value::array(parts))
                }
                (other, _) => Err(wrong_input("split", TypeTag::Str, other)),
            }
        });

        self.register("upper", |args| {
            expect_arity("upper", 1, args)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => Err(wrong_input("upper", TypeTag::Str, other)),
            }
        });

        self.register("lower", |args| {
            expect_arity("lower", 1, args)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                other => Err(wrong_input("lower", TypeTag::Str, other)),
            }
        });

        self.register("trim", |args| {
            expect_arity("trim", 1, args)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Str(s.trim().to_string())),
                other => Err(wrong_input("trim", TypeTag::Str, other)),
            }
        });

        self.register("contains?", |args| {
            expect_arity("contains?", 2, args)?;
            match &args[0] {
                Value::Str(s) => match &args[1] {
                    Value::Str(needle) => Ok(Value::Bool(s.contains(needle.as_str()))),
                    other => Err(wrong_input("contains?", TypeTag::Str, other)),
                },
                Value::Array(items) => {
                    Ok(Value::Bool(items.borrow().iter().any(|v| *v == args[1])))
                }
                Value::Hash(entries) => {
                    let key = HashKey::from_value(&args[1])?;
                    Ok(Value::Bool(entries.borrow().contains_key(&key)))
                }
                other => Err(wrong_input("contains?", TypeTag::Array, other)),
            }
        });

        self.register("keys", |args| {
            expect_arity("keys", 1, args)?;
            match &args[0] {
                Value::Hash(entries) => {
                    let mut keys: Vec<String> =
                        entries.borrow().keys().map(|k| k.to_string()).collect();
                    keys.sort();
                    Ok(Value::array(keys.into_iter().map(Value::Str).collect()))
                }
                other => Err(wrong_input("keys", TypeTag::Hash, other)),
            }
        });

        self.register("abs", |args| {
            expect_arity("abs", 1, args)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(n.abs())),
                Value::Float(n) => Ok(Value::Float(n.abs())),
                other => Err(wrong_input("abs", TypeTag::Int, other)),
            }
        });

        self.register("even?", |args| {
            expect_arity("even?", 1, args)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Bool(n % 2 == 0)),
                other => Err(wrong_input("even?", TypeTag::Int, other)),
            }
        });

        self.register("odd?", |args| {
            expect_arity("odd?", 1, args)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Bool(n % 2 != 0)),
                other => Err(wrong_input("odd?", TypeTag::Int, other)),
            }
        });

        self.register("str", |args| {
            expect_arity("str", 1, args)?;
            Ok(Value::Str(args[0].to_string()))
        });

        self.register("int", |args| {
            expect_arity("int", 1, args)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(*n)),
                Value::Float(n) => Ok(Value::Int(*n as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    EvalError::InputTypeMismatch {
                        name: "int".to_string(),
                        expected: "numeric str".to_string(),
                        actual: format!("\"{}\"", s),
                    }
                }),
                other => Err(wrong_input("int", TypeTag::Int, other)),
            }
        });

        self.register("type", |args| {
            expect_arity("type", 1, args)?;
            Ok(Value::Str(args[0].type_tag().name().to_string()))
        });

        self.register("print", |args| {
            let line = args
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            debug!("print builtin: {}", line);
            println!("{}", line);
            Ok(Value::Null)
        });
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_arity(name: &str, expected: usize, args: &[Value]) -> EvalResult<()> {
    if args.len() != expected {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn wrong_input(name: &str, expected: TypeTag, actual: &Value) -> EvalError {
    EvalError::InputTypeMismatch {
        name: name.to_string(),
        expected: expected.name().to_string(),
        actual: actual.type_tag().name().to_string(),
    }
}
