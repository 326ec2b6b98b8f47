use std::rc::Rc;

use log::{debug, trace};

use crate::{
    ast::{Block, Expression, FunctionLit, InfixOp, PrefixOp, Program, Statement},
    builtins::Builtins,
    error::{EvalError, EvalResult},
    object::{Environment, FunctionValue, HashKey, Value, PIPE_VALUE},
};

pub struct Interpreter {
    global: Rc<Environment>,
    builtins: Builtins,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            global: Environment::new(None),
            builtins: Builtins::new(),
        }
    }

    /// The root environment; exposed so a hosting layer can seed bindings.
    pub fn global(&self) -> &Rc<Environment> {
        &self.global
    }

    /// Mutable access to the builtin registry, for hosts that add or
    /// override names before evaluation starts.
    pub fn builtins_mut(&mut self) -> &mut Builtins {
        &mut self.builtins
    }

    /// Evaluate the program root. `preregister` must have run first or
    /// forward function references stay unresolved.
    pub fn eval_program(&self, program: &Program) -> EvalResult<Value> {
        self.eval_statements(&program.statements, Rc::clone(&self.global))
    }

    // --- pre-registration ---------------------------------------------------

    /// Hoist every named function literal in the program into the root
    /// environment so call order in source text does not matter. Pass 1
    /// covers top-level statements, pass 2 recursively walks every nested
    /// construct. Registration deduplicates by body identity, so a repeat
    /// run is a no-op.
    pub fn preregister(&self, program: &Program) {
        for statement in &program.statements {
            if let Statement::Expression(Expression::Function(lit)) = statement {
                self.register_literal(lit);
            }
        }
        for statement in &program.statements {
            self.walk_statement(statement);
        }
    }

    fn register_literal(&self, lit: &Rc<FunctionLit>) {
        if let Some(name) = &lit.name {
            trace!("preregister: hoisting function '{}'", name);
            self.global.register_function(Rc::new(FunctionValue {
                name: name.clone(),
                params: lit.params.clone(),
                body: Rc::clone(&lit.body),
                env: Rc::clone(&self.global),
                input_type: lit.input_type,
                return_type: lit.return_type,
                condition: lit.condition.clone(),
            }));
        }
    }

    fn walk_statement(&self, statement: &Statement) {
        match statement {
            Statement::Let { expr, .. } => self.walk_expression(expr),
            Statement::Expression(expr) => self.walk_expression(expr),
        }
    }

    fn walk_block(&self, block: &Block) {
        for statement in &block.statements {
            self.walk_statement(statement);
        }
    }

    fn walk_expression(&self, expr: &Expression) {
        match expr {
            Expression::Function(lit) => {
                self.register_literal(lit);
                if let Some(condition) = &lit.condition {
                    self.walk_expression(condition);
                }
                self.walk_block(&lit.body);
            }
            Expression::Prefix { right, .. } => self.walk_expression(right),
            Expression::Infix { left, right, .. } => {
                self.walk_expression(left);
                self.walk_expression(right);
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                self.walk_expression(condition);
                self.walk_block(consequence);
                if let Some(alternative) = alternative {
                    self.walk_block(alternative);
                }
            }
            Expression::Call { callee, args } => {
                self.walk_expression(callee);
                for arg in args {
                    self.walk_expression(arg);
                }
            }
            Expression::Array(elements) => {
                for element in elements {
                    self.walk_expression(element);
                }
            }
            Expression::Hash(entries) => {
                for (key, value) in entries {
                    self.walk_expression(key);
                    self.walk_expression(value);
                }
            }
            Expression::Index { target, index } => {
                self.walk_expression(target);
                self.walk_expression(index);
            }
            Expression::Slice { target, start, end } => {
                self.walk_expression(target);
                if let Some(start) = start {
                    self.walk_expression(start);
                }
                if let Some(end) = end {
                    self.walk_expression(end);
                }
            }
            Expression::Member { object, .. } => self.walk_expression(object),
            Expression::ReturnWrite(value) => self.walk_expression(value),
            Expression::Int(_)
            | Expression::Float(_)
            | Expression::Bool(_)
            | Expression::Str(_)
            | Expression::Null
            | Expression::PipeValue
            | Expression::SecondaryOutput
            | Expression::Identifier(_) => {}
        }
    }

    // --- statement and block evaluation -------------------------------------

    fn eval_statements(&self, statements: &[Statement], env: Rc<Environment>) -> EvalResult<Value> {
        let mut result = Value::Null;
        for statement in statements {
            result = self.eval_statement(statement, Rc::clone(&env))?;
            if matches!(result, Value::Return(_)) {
                return Ok(result);
            }
        }
        Ok(result)
    }

    fn eval_statement(&self, statement: &Statement, env: Rc<Environment>) -> EvalResult<Value> {
        match statement {
            Statement::Let { name, expr } => {
                let value = self.eval_expression(expr, Rc::clone(&env))?;
                env.set(name.clone(), value);
                Ok(Value::Null)
            }
            Statement::Expression(expr) => self.eval_expression(expr, env),
        }
    }

    fn eval_block(&self, block: &Block, env: Rc<Environment>) -> EvalResult<Value> {
        let child = Environment::new(Some(env));
        self.eval_statements(&block.statements, child)
    }

    // --- expression evaluation ----------------------------------------------

    pub fn eval_expression(&self, expr: &Expression, env: Rc<Environment>) -> EvalResult<Value> {
        match expr {
            Expression::Int(n) => Ok(Value::Int(*n)),
            Expression::Float(n) => Ok(Value::Float(*n)),
            Expression::Bool(b) => Ok(Value::Bool(*b)),
            Expression::Str(s) => Ok(Value::Str(s.clone())),
            Expression::Null => Ok(Value::Null),
            Expression::PipeValue => {
                env.get(PIPE_VALUE).ok_or(EvalError::UndefinedPipeValue)
            }
            Expression::SecondaryOutput => Ok(Value::Return(Box::new(Value::Null))),
            Expression::ReturnWrite(value) => {
                let value = self.eval_expression(value, env)?;
                Ok(Value::Return(Box::new(value)))
            }
            Expression::Identifier(name) => self.eval_identifier(name, &env),
            Expression::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval_expression(element, Rc::clone(&env))?);
                }
                Ok(Value::array(values))
            }
            Expression::Hash(entries) => {
                let mut map = std::collections::HashMap::with_capacity(entries.len());
                for (key_expr, value_expr) in entries {
                    let key = self.eval_expression(key_expr, Rc::clone(&env))?;
                    let key = HashKey::from_value(&key)?;
                    let value = self.eval_expression(value_expr, Rc::clone(&env))?;
                    map.insert(key, value);
                }
                Ok(Value::hash(map))
            }
            Expression::Prefix { op, right } => {
                let value = self.eval_expression(right, env)?;
                self.eval_prefix(*op, value)
            }
            Expression::Infix { left, op, right } => match op {
                InfixOp::Pipe => self.eval_pipe(left, right, &env),
                InfixOp::MapPipe => self.eval_map_pipe(left, right, &env),
                InfixOp::FilterPipe => self.eval_filter_pipe(left, right, &env),
                InfixOp::Or => self.eval_or(left, right, &env),
                _ => {
                    let left = self.eval_expression(left, Rc::clone(&env))?;
                    let right = self.eval_expression(right, env)?;
                    self.eval_infix(*op, left, right)
                }
            },
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                let verdict = self.eval_expression(condition, Rc::clone(&env))?;
                if verdict.is_truthy() {
                    self.eval_block(consequence, env)
                } else if let Some(alternative) = alternative {
                    self.eval_block(alternative, env)
                } else {
                    Ok(Value::Null)
                }
            }
            Expression::Index { target, index } => {
                let target = self.eval_expression(target, Rc::clone(&env))?;
                let index = self.eval_expression(index, env)?;
                self.eval_index(target, index)
            }
            Expression::Slice { target, start, end } => {
                let target = self.eval_expression(target, Rc::clone(&env))?;
                let start = match start {
                    Some(expr) => Some(self.expect_int_bound(expr, Rc::clone(&env))?),
                    None => None,
                };
                let end = match end {
                    Some(expr) => Some(self.expect_int_bound(expr, env)?),
                    None => None,
                };
                self.eval_slice(target, start, end)
            }
            Expression::Member { object, property } => {
                let object = self.eval_expression(object, env)?;
                self.eval_member(object, property)
            }
            Expression::Call { callee, args } => self.eval_call(callee, args, env),
            Expression::Function(lit) => {
                let func = Rc::new(FunctionValue {
                    name: lit.name.clone().unwrap_or_default(),
                    params: lit.params.clone(),
                    body: Rc::clone(&lit.body),
                    env: Rc::clone(&env),
                    input_type: lit.input_type,
                    return_type: lit.return_type,
                    condition: lit.condition.clone(),
                });
                if lit.name.is_some() {
                    env.register_function(Rc::clone(&func));
                }
                Ok(Value::Function(func))
            }
        }
    }

    fn eval_identifier(&self, name: &str, env: &Rc<Environment>) -> EvalResult<Value> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        if let Some(builtin) = self.builtins.get(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(EvalError::UndefinedIdentifier {
            name: name.to_string(),
        })
    }

    fn eval_prefix(&self, op: PrefixOp, value: Value) -> EvalResult<Value> {
        match op {
            PrefixOp::Neg => match value {
                Value::Int(n) => Ok(Value::Int(-n)),
                other => Err(EvalError::TypeMismatch {
                    left: "-".to_string(),
                    op: "prefix".to_string(),
                    right: other.type_tag().to_string(),
                }),
            },
            PrefixOp::Not => Ok(Value::Bool(!value.is_truthy())),
        }
    }

    fn eval_infix(&self, op: InfixOp, left: Value, right: Value) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => self.eval_int_infix(op, *l, *r),
            (Value::Float(l), Value::Float(r)) => self.eval_float_infix(op, *l, *r),
            (Value::Str(l), Value::Str(r)) => self.eval_str_infix(op, l, r),
            (Value::Bool(l), Value::Bool(r)) => self.eval_bool_infix(op, *l, *r),
            (Value::Null, Value::Null) => match op {
                InfixOp::Eq => Ok(Value::Bool(true)),
                InfixOp::NotEq => Ok(Value::Bool(false)),
                _ => Err(self.unknown_operator(op, &left)),
            },
            (Value::Array(_), Value::Array(_)) | (Value::Hash(_), Value::Hash(_)) => match op {
                InfixOp::Eq => Ok(Value::Bool(left == right)),
                InfixOp::NotEq => Ok(Value::Bool(left != right)),
                _ => Err(self.unknown_operator(op, &left)),
            },
            _ => Err(EvalError::TypeMismatch {
                left: left.type_tag().to_string(),
                op: op.to_string(),
                right: right.type_tag().to_string(),
            }),
        }
    }

    fn eval_int_infix(&self, op: InfixOp, l: i64, r: i64) -> EvalResult<Value> {
        match op {
            InfixOp::Add => Ok(Value::Int(l + r)),
            InfixOp::Sub => Ok(Value::Int(l - r)),
            InfixOp::Mul => Ok(Value::Int(l * r)),
            InfixOp::Div => {
                if r == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Int(l / r))
                }
            }
            InfixOp::Mod => {
                if r == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Int(l % r))
                }
            }
            InfixOp::Eq => Ok(Value::Bool(l == r)),
            InfixOp::NotEq => Ok(Value::Bool(l != r)),
            InfixOp::Lt => Ok(Value::Bool(l < r)),
            InfixOp::LtEq => Ok(Value::Bool(l <= r)),
            InfixOp::Gt => Ok(Value::Bool(l > r)),
            InfixOp::GtEq => Ok(Value::Bool(l >= r)),
            _ => Err(self.unknown_operator(op, &Value::Int(l))),
        }
    }

    fn eval_float_infix(&self, op: InfixOp, l: f64, r: f64) -> EvalResult<Value> {
        match op {
            InfixOp::Add => Ok(Value::Float(l + r)),
            InfixOp::Sub => Ok(Value::Float(l - r)),
            InfixOp::Mul => Ok(Value::Float(l * r)),
            InfixOp::Div => Ok(Value::Float(l / r)),
            InfixOp::Eq => Ok(Value::Bool(l == r)),
            InfixOp::NotEq => Ok(Value::Bool(l != r)),
            InfixOp::Lt => Ok(Value::Bool(l < r)),
            InfixOp::LtEq => Ok(Value::Bool(l <= r)),
            InfixOp::Gt => Ok(Value::Bool(l > r)),
            InfixOp::GtEq => Ok(Value::Bool(l >= r)),
            _ => Err(self.unknown_operator(op, &Value::Float(l))),
        }
    }

    fn eval_str_infix(&self, op: InfixOp, l: &str, r: &str) -> EvalResult<Value> {
        match op {
            InfixOp::Add => Ok(Value::Str(format!("{}{}", l, r))),
            InfixOp::Eq => Ok(Value::Bool(l == r)),
            InfixOp::NotEq => Ok(Value::Bool(l != r)),
            InfixOp::Lt => Ok(Value::Bool(l < r)),
            InfixOp::LtEq => Ok(Value::Bool(l <= r)),
            InfixOp::Gt => Ok(Value::Bool(l > r)),
            InfixOp::GtEq => Ok(Value::Bool(l >= r)),
            _ => Err(self.unknown_operator(op, &Value::Str(l.to_string()))),
        }
    }

    fn eval_bool_infix(&self, op: InfixOp, l: bool, r: bool) -> EvalResult<Value> {
        match op {
            InfixOp::Eq => Ok(Value::Bool(l == r)),
            InfixOp::NotEq => Ok(Value::Bool(l != r)),
            InfixOp::And => Ok(Value::Bool(l && r)),
            InfixOp::Or => Ok(Value::Bool(l || r)),
            _ => Err(self.unknown_operator(op, &Value::Bool(l))),
        }
    }

    fn unknown_operator(&self, op: InfixOp, operand: &Value) -> EvalError {
        EvalError::UnknownOperator {
            op: op.to_string(),
            operand: operand.type_tag().to_string(),
        }
    }

    /// `|` keeps boolean-or semantics: the left operand when truthy, else
    /// the right. Other same-typed pairs fall through to ordinary infix
    /// evaluation.
    fn eval_or(
        &self,
        left: &Expression,
        right: &Expression,
        env: &Rc<Environment>,
    ) -> EvalResult<Value> {
        let left = self.eval_expression(left, Rc::clone(env))?;
        if matches!(left, Value::Bool(true)) {
            return Ok(left);
        }
        let right = self.eval_expression(right, Rc::clone(env))?;
        if matches!(left, Value::Bool(false)) {
            if matches!(right, Value::Bool(_)) {
                return Ok(right);
            }
            return Err(EvalError::TypeMismatch {
                left: left.type_tag().to_string(),
                op: InfixOp::Or.to_string(),
                right: right.type_tag().to_string(),
            });
        }
        self.eval_infix(InfixOp::Or, left, right)
    }

    // --- indexing and slicing -----------------------------------------------

    fn expect_int_bound(&self, expr: &Expression, env: Rc<Environment>) -> EvalResult<i64> {
        match self.eval_expression(expr, env)? {
            Value::Int(n) => Ok(n),
            other => Err(EvalError::TypeMismatch {
                left: other.type_tag().to_string(),
                op: "..".to_string(),
                right: "int".to_string(),
            }),
        }
    }

    fn eval_index(&self, target: Value, index: Value) -> EvalResult<Value> {
        match &target {
            Value::Array(items) => {
                let items = items.borrow();
                let position = match index {
                    Value::Int(n) => n,
                    other => {
                        return Err(EvalError::TypeMismatch {
                            left: "array".to_string(),
                            op: "index".to_string(),
                            right: other.type_tag().to_string(),
                        })
                    }
                };
                let resolved = normalize_index(position, items.len())?;
                Ok(items[resolved].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let position = match index {
                    Value::Int(n) => n,
                    other => {
                        return Err(EvalError::TypeMismatch {
                            left: "str".to_string(),
                            op: "index".to_string(),
                            right: other.type_tag().to_string(),
                        })
                    }
                };
                let resolved = normalize_index(position, chars.len())?;
                Ok(Value::Str(chars[resolved].to_string()))
            }
            Value::Hash(entries) => {
                let key = HashKey::from_value(&index)?;
                Ok(entries.borrow().get(&key).cloned().unwrap_or(Value::Null))
            }
            other => Err(EvalError::UnsupportedIndexTarget {
                kind: other.type_tag().to_string(),
            }),
        }
    }

    fn eval_slice(
        &self,
        target: Value,
        start: Option<i64>,
        end: Option<i64>,
    ) -> EvalResult<Value> {
        match &target {
            Value::Array(items) => {
                let items = items.borrow();
                let (from, to) = normalize_range(start, end, items.len())?;
                Ok(Value::array(items[from..to].to_vec()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (from, to) = normalize_range(start, end, chars.len())?;
                Ok(Value::Str(chars[from..to].iter().collect()))
            }
            other => Err(EvalError::UnsupportedIndexTarget {
                kind: other.type_tag().to_string(),
            }),
        }
    }

    fn eval_member(&self, object: Value, property: &str) -> EvalResult<Value> {
        match &object {
            Value::Hash(entries) => Ok(entries
                .borrow()
                .get(&HashKey::Str(property.to_string()))
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(EvalError::UnsupportedIndexTarget {
                kind: other.type_tag().to_string(),
            }),
        }
    }

    // --- calls, pipelines and dispatch --------------------------------------

    fn eval_call(
        &self,
        callee: &Expression,
        args: &[Expression],
        env: Rc<Environment>,
    ) -> EvalResult<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expression(arg, Rc::clone(&env))?);
        }
        if let Expression::Identifier(name) = callee {
            return self.dispatch(name, values, &env);
        }
        match self.eval_expression(callee, Rc::clone(&env))? {
            Value::Function(func) => self.invoke(&func, values),
            Value::Builtin(builtin) => (builtin.func)(&values),
            other => Err(EvalError::UnknownOperator {
                op: "call".to_string(),
                operand: other.type_tag().to_string(),
            }),
        }
    }

    fn eval_pipe(
        &self,
        left: &Expression,
        right: &Expression,
        env: &Rc<Environment>,
    ) -> EvalResult<Value> {
        let subject = self.eval_expression(left, Rc::clone(env))?;
        trace!("pipeline: |> with subject {:?}", subject);
        self.apply_pipe_target(subject, right, env)
    }

    fn eval_map_pipe(
        &self,
        left: &Expression,
        right: &Expression,
        env: &Rc<Environment>,
    ) -> EvalResult<Value> {
        let subject = self.eval_expression(left, Rc::clone(env))?;
        match subject {
            Value::Array(items) => {
                // Snapshot so the callee can never observe partial results.
                let snapshot = items.borrow().clone();
                trace!("pipeline: +> over {} element(s)", snapshot.len());
                let mut mapped = Vec::with_capacity(snapshot.len());
                for item in snapshot {
                    mapped.push(self.apply_pipe_target(item, right, env)?);
                }
                Ok(Value::array(mapped))
            }
            scalar => self.apply_pipe_target(scalar, right, env),
        }
    }

    fn eval_filter_pipe(
        &self,
        left: &Expression,
        right: &Expression,
        env: &Rc<Environment>,
    ) -> EvalResult<Value> {
        let subject = self.eval_expression(left, Rc::clone(env))?;
        match subject {
            Value::Array(items) => {
                let snapshot = items.borrow().clone();
                trace!("pipeline: ?> over {} element(s)", snapshot.len());
                let mut kept = Vec::new();
                for item in snapshot {
                    let verdict = self.apply_pipe_target(item.clone(), right, env)?;
                    if verdict.is_truthy() {
                        kept.push(item);
                    }
                }
                Ok(Value::array(kept))
            }
            scalar => {
                let verdict = self.apply_pipe_target(scalar.clone(), right, env)?;
                if verdict.is_truthy() {
                    Ok(scalar)
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    /// Feed one subject through the right-hand side of a pipeline operator.
    /// Bare identifiers become zero-argument invocations; calls get the
    /// subject prepended at argument slot 0, with the pipe value visible to
    /// the argument expressions.
    fn apply_pipe_target(
        &self,
        subject: Value,
        target: &Expression,
        env: &Rc<Environment>,
    ) -> EvalResult<Value> {
        match target {
            Expression::Identifier(name) => self.dispatch(name, vec![subject], env),
            Expression::Call { callee, args } => {
                let Expression::Identifier(name) = callee.as_ref() else {
                    return Err(EvalError::InvalidPipelineTarget);
                };
                let arg_env = Environment::new(Some(Rc::clone(env)));
                if !matches!(subject, Value::Null) {
                    arg_env.set(PIPE_VALUE.to_string(), subject.clone());
                }
                let mut full_args = vec![subject];
                for arg in args {
                    full_args.push(self.eval_expression(arg, Rc::clone(&arg_env))?);
                }
                self.dispatch(name, full_args, env)
            }
            _ => Err(EvalError::InvalidPipelineTarget),
        }
    }

    /// Select and invoke the right candidate for a named call. Builtins win
    /// outright; otherwise conditional variants are tried in declaration
    /// order against the subject (argument 0) and the default variant is
    /// the fallback.
    fn dispatch(&self, name: &str, args: Vec<Value>, env: &Rc<Environment>) -> EvalResult<Value> {
        if let Some(builtin) = self.builtins.get(name) {
            debug!("dispatch '{}': builtin", name);
            return (builtin.func)(&args);
        }

        let Some(candidates) = env.dispatch_candidates(name) else {
            return match env.get(name) {
                Some(Value::Function(func)) => self.invoke(&func, args),
                Some(Value::Builtin(builtin)) => (builtin.func)(&args),
                Some(other) => Err(EvalError::UnknownOperator {
                    op: "call".to_string(),
                    operand: other.type_tag().to_string(),
                }),
                None => Err(EvalError::UndefinedFunction {
                    name: name.to_string(),
                }),
            };
        };

        if candidates.is_empty() {
            return Err(EvalError::UndefinedFunction {
                name: name.to_string(),
            });
        }
        if candidates.len() == 1 {
            return self.invoke(&candidates[0], args);
        }

        let subject = args.first().cloned();
        for (position, candidate) in candidates.iter().enumerate() {
            let Some(condition) = &candidate.condition else {
                continue;
            };
            let condition_env = Environment::new(Some(Rc::clone(env)));
            if let Some(subject) = &subject {
                if !matches!(subject, Value::Null) {
                    condition_env.set(PIPE_VALUE.to_string(), subject.clone());
                }
            }
            // A condition error aborts dispatch; no fallback to later
            // candidates.
            let verdict = self.eval_expression(condition, condition_env)?;
            if verdict.is_truthy() {
                debug!("dispatch '{}': conditional variant {} matched", name, position);
                return self.invoke(candidate, args);
            }
        }

        if let Some(default) = candidates.iter().find(|c| c.is_default()) {
            debug!("dispatch '{}': default variant", name);
            return self.invoke(default, args);
        }

        Err(EvalError::NoMatchingConditionalFunction {
            name: name.to_string(),
        })
    }

    /// Shared invocation mechanics. Argument slot 0 is the pipe value; the
    /// declared parameters bind to the remaining arguments, or pairwise when
    /// the caller supplied exactly one value per parameter (so plain
    /// `add(1, 2)` still works).
    fn invoke(&self, func: &Rc<FunctionValue>, args: Vec<Value>) -> EvalResult<Value> {
        let display_name = if func.name.is_empty() {
            "<fn>".to_string()
        } else {
            func.name.clone()
        };

        if let (Some(expected), Some(first)) = (func.input_type, args.first()) {
            if first.type_tag() != expected {
                return Err(EvalError::InputTypeMismatch {
                    name: display_name,
                    expected: expected.to_string(),
                    actual: first.type_tag().to_string(),
                });
            }
        }

        let call_env = Environment::new(Some(Rc::clone(&func.env)));
        if let Some(subject) = args.first() {
            // A null subject is skipped so absence is not masked.
            if !matches!(subject, Value::Null) {
                call_env.set(PIPE_VALUE.to_string(), subject.clone());
            }
        }

        if args.len() == func.params.len() {
            for (param, value) in func.params.iter().zip(args.iter()) {
                call_env.set(param.clone(), value.clone());
            }
        } else if args.len() == func.params.len() + 1 {
            for (param, value) in func.params.iter().zip(args.iter().skip(1)) {
                call_env.set(param.clone(), value.clone());
            }
        } else {
            return Err(EvalError::ArityMismatch {
                name: display_name,
                expected: func.params.len(),
                actual: args.len(),
            });
        }

        let result = self.eval_statements(&func.body.statements, call_env)?;
        let result = match result {
            Value::Return(inner) => *inner,
            other => other,
        };

        if let Some(expected) = func.return_type {
            if result.type_tag() != expected {
                return Err(EvalError::ReturnTypeMismatch {
                    name: display_name,
                    expected: expected.to_string(),
                    actual: result.type_tag().to_string(),
                });
            }
        }

        Ok(result)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_index(index: i64, len: usize) -> EvalResult<usize> {
    let resolved = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if resolved < 0 || resolved >= len as i64 {
        return Err(EvalError::IndexOutOfRange { index, len });
    }
    Ok(resolved as usize)
}

fn normalize_range(
    start: Option<i64>,
    end: Option<i64>,
    len: usize,
) -> EvalResult<(usize, usize)> {
    let normalize = |bound: i64| -> EvalResult<usize> {
        let resolved = if bound < 0 { bound + len as i64 } else { bound };
        if resolved < 0 || resolved > len as i64 {
            return Err(EvalError::IndexOutOfRange { index: bound, len });
        }
        Ok(resolved as usize)
    };
    let from = match start {
        Some(bound) => normalize(bound)?,
        None => 0,
    };
    let to = match end {
        Some(bound) => normalize(bound)?,
        None => len,
    };
    // An inverted range is empty rather than an error.
    Ok((from, to.max(from)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::Lexer, parser::Parser};
    use pretty_assertions::assert_eq;

    fn run_source(source: &str) -> EvalResult<Value> {
        let tokens = Lexer::new(source).lex().expect("lexing should succeed");
        let program = Parser::with_source(tokens, source)
            .parse_program()
            .expect("parsing should succeed");
        let interpreter = Interpreter::new();
        interpreter.preregister(&program);
        interpreter.eval_program(&program)
    }

    fn eval_ok(source: &str) -> Value {
        run_source(source).expect("evaluation should succeed")
    }

    fn eval_err(source: &str) -> EvalError {
        run_source(source).expect_err("evaluation should fail")
    }

    fn ints(values: &[i64]) -> Value {
        Value::array(values.iter().copied().map(Value::Int).collect())
    }

    const FIZZBUZZ: &str = "
        fn fizzbuzz() when 🍕 % 15 == 0 { 💩 = \"FizzBuzz\" }
        fn fizzbuzz() when 🍕 % 3 == 0 { 💩 = \"Fizz\" }
        fn fizzbuzz() when 🍕 % 5 == 0 { 💩 = \"Buzz\" }
        fn fizzbuzz() { 💩 = 🍕 }
    ";

    #[test]
    fn fizzbuzz_picks_the_first_matching_conditional() {
        let source = format!("{}\n15 |> fizzbuzz", FIZZBUZZ);
        assert_eq!(eval_ok(&source), Value::Str("FizzBuzz".to_string()));
        let source = format!("{}\n9 |> fizzbuzz", FIZZBUZZ);
        assert_eq!(eval_ok(&source), Value::Str("Fizz".to_string()));
        let source = format!("{}\n10 |> fizzbuzz", FIZZBUZZ);
        assert_eq!(eval_ok(&source), Value::Str("Buzz".to_string()));
    }

    #[test]
    fn fizzbuzz_falls_back_to_the_default_variant() {
        let source = format!("{}\n7 |> fizzbuzz", FIZZBUZZ);
        assert_eq!(eval_ok(&source), Value::Int(7));
    }

    #[test]
    fn dispatch_works_for_direct_calls_too() {
        let source = format!("{}\nfizzbuzz(15)", FIZZBUZZ);
        assert_eq!(eval_ok(&source), Value::Str("FizzBuzz".to_string()));
    }

    #[test]
    fn a_matching_conditional_never_runs_the_default_body() {
        let source = "
            fn tag() when 🍕 > 0 { \"positive\" }
            fn tag() { \"other\" }
            3 |> tag
        ";
        assert_eq!(eval_ok(source), Value::Str("positive".to_string()));
    }

    #[test]
    fn the_first_truthy_condition_wins() {
        let source = "
            fn pick() when 🍕 > 0 { \"first\" }
            fn pick() when 🍕 > 0 { \"second\" }
            1 |> pick
        ";
        assert_eq!(eval_ok(source), Value::Str("first".to_string()));
    }

    #[test]
    fn no_matching_conditional_and_no_default_fails() {
        let source = "
            fn pick() when 🍕 > 10 { \"big\" }
            fn pick() when 🍕 > 100 { \"huge\" }
            1 |> pick
        ";
        assert_eq!(
            eval_err(source),
            EvalError::NoMatchingConditionalFunction {
                name: "pick".to_string()
            }
        );
    }

    #[test]
    fn a_condition_error_aborts_dispatch() {
        let source = "
            fn pick() when nonsense > 1 { \"a\" }
            fn pick() { \"b\" }
            1 |> pick
        ";
        assert_eq!(
            eval_err(source),
            EvalError::UndefinedIdentifier {
                name: "nonsense".to_string()
            }
        );
    }

    #[test]
    fn pipe_value_does_not_leak_into_the_enclosing_scope() {
        let source = "
            fn double() { 🍕 * 2 }
            let r = 5 |> double
            🍕
        ";
        assert_eq!(eval_err(source), EvalError::UndefinedPipeValue);
    }

    #[test]
    fn pipeline_call_arguments_can_reference_the_pipe_value() {
        let source = "
            fn add(n) { 🍕 + n }
            10 |> add(🍕)
        ";
        assert_eq!(eval_ok(source), Value::Int(20));
    }

    #[test]
    fn pipeline_with_extra_arguments_binds_them_after_the_subject() {
        let source = "
            fn add(n) { 🍕 + n }
            10 |> add(5)
        ";
        assert_eq!(eval_ok(source), Value::Int(15));
    }

    #[test]
    fn pipeline_into_anything_else_is_invalid() {
        assert_eq!(eval_err("5 |> 3"), EvalError::InvalidPipelineTarget);
    }

    #[test]
    fn map_pipe_preserves_length_and_order() {
        let source = "
            fn double() { 🍕 * 2 }
            [1, 2, 3] +> double
        ";
        assert_eq!(eval_ok(source), ints(&[2, 4, 6]));
    }

    #[test]
    fn map_pipe_unwraps_a_scalar_subject() {
        let source = "
            fn double() { 🍕 * 2 }
            4 +> double
        ";
        assert_eq!(eval_ok(source), Value::Int(8));
    }

    #[test]
    fn filter_pipe_keeps_matching_elements_in_order() {
        assert_eq!(eval_ok("[1, 2, 3, 4, 5] ?> even?"), ints(&[2, 4]));
    }

    #[test]
    fn filter_pipe_does_not_mutate_the_input() {
        let source = "
            let xs = [1, 2, 3, 4, 5]
            let kept = xs ?> even?
            xs
        ";
        assert_eq!(eval_ok(source), ints(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn pipes_chain_left_to_right() {
        let source = "
            fn double() { 🍕 * 2 }
            [1, 2, 3, 4] ?> even? +> double
        ";
        assert_eq!(eval_ok(source), ints(&[4, 8]));
    }

    #[test]
    fn builtins_participate_in_pipelines() {
        assert_eq!(
            eval_ok("\"hey\" |> upper"),
            Value::Str("HEY".to_string())
        );
        assert_eq!(eval_ok("[1, 2, 3] |> len"), Value::Int(3));
    }

    #[test]
    fn parallel_pipe_is_boolean_or() {
        assert_eq!(eval_ok("false | true"), Value::Bool(true));
        assert_eq!(eval_ok("true | false"), Value::Bool(true));
        assert_eq!(eval_ok("false | false"), Value::Bool(false));
    }

    #[test]
    fn parallel_pipe_rejects_non_booleans() {
        assert_eq!(
            eval_err("1 | 2"),
            EvalError::UnknownOperator {
                op: "|".to_string(),
                operand: "int".to_string()
            }
        );
    }

    #[test]
    fn negative_indices_wrap_around() {
        assert_eq!(eval_ok("[1, 2, 3][-1]"), Value::Int(3));
        assert_eq!(eval_ok("[1, 2, 3][0]"), Value::Int(1));
    }

    #[test]
    fn slices_normalize_negative_and_open_bounds() {
        assert_eq!(eval_ok("[1, 2, 3, 4, 5][-2..]"), ints(&[4, 5]));
        assert_eq!(eval_ok("[1, 2, 3, 4, 5][..-2]"), ints(&[1, 2, 3]));
        assert_eq!(eval_ok("[1, 2, 3, 4, 5][1..3]"), ints(&[2, 3]));
        assert_eq!(eval_ok("[1, 2, 3][..]"), ints(&[1, 2, 3]));
    }

    #[test]
    fn out_of_range_indices_fail_after_normalization() {
        assert_eq!(
            eval_err("[1, 2, 3][5]"),
            EvalError::IndexOutOfRange { index: 5, len: 3 }
        );
        assert_eq!(
            eval_err("[1, 2, 3][-4]"),
            EvalError::IndexOutOfRange { index: -4, len: 3 }
        );
    }

    #[test]
    fn strings_index_and_slice_by_char() {
        assert_eq!(eval_ok("\"héllo\"[1]"), Value::Str("é".to_string()));
        assert_eq!(eval_ok("\"héllo\"[-1]"), Value::Str("o".to_string()));
        assert_eq!(eval_ok("\"héllo\"[1..3]"), Value::Str("él".to_string()));
    }

    #[test]
    fn indexing_unsupported_targets_fails() {
        assert_eq!(
            eval_err("5[0]"),
            EvalError::UnsupportedIndexTarget {
                kind: "int".to_string()
            }
        );
    }

    #[test]
    fn division_and_modulo_by_zero_are_errors_not_panics() {
        assert_eq!(eval_err("10 / 0"), EvalError::DivisionByZero);
        assert_eq!(eval_err("10 % 0"), EvalError::DivisionByZero);
        assert_eq!(eval_err("0 / 0"), EvalError::DivisionByZero);
        assert_eq!(eval_err("-7 % 0"), EvalError::DivisionByZero);
    }

    #[test]
    fn cross_type_operands_are_a_type_mismatch() {
        assert_eq!(
            eval_err("1 + \"a\""),
            EvalError::TypeMismatch {
                left: "int".to_string(),
                op: "+".to_string(),
                right: "str".to_string()
            }
        );
    }

    #[test]
    fn numeric_negation_requires_an_integer() {
        assert_eq!(eval_ok("-5"), Value::Int(-5));
        assert!(matches!(
            eval_err("-\"abc\""),
            EvalError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn not_coerces_by_truthiness() {
        assert_eq!(eval_ok("!false"), Value::Bool(true));
        assert_eq!(eval_ok("not null"), Value::Bool(true));
        assert_eq!(eval_ok("!0"), Value::Bool(false));
        assert_eq!(eval_ok("!\"\""), Value::Bool(false));
    }

    #[test]
    fn forward_references_work_after_preregistration() {
        let source = "
            let r = helper(2)
            fn helper(n) { n + 1 }
            r
        ";
        assert_eq!(eval_ok(source), Value::Int(3));
    }

    #[test]
    fn functions_nested_in_unexecuted_blocks_are_still_hoisted() {
        let source = "
            let r = helper(2)
            if (false) {
                fn helper(n) { n + 1 }
            }
            r
        ";
        assert_eq!(eval_ok(source), Value::Int(3));
    }

    #[test]
    fn preregistration_is_idempotent() {
        let source = format!("{}\n", FIZZBUZZ);
        let tokens = Lexer::new(&source).lex().expect("lex");
        let program = Parser::new(tokens).parse_program().expect("parse");
        let interpreter = Interpreter::new();
        interpreter.preregister(&program);
        let before = interpreter
            .global()
            .dispatch_candidates("fizzbuzz")
            .expect("group should exist")
            .len();
        interpreter.preregister(&program);
        let after = interpreter
            .global()
            .dispatch_candidates("fizzbuzz")
            .expect("group should exist")
            .len();
        assert_eq!(before, 4);
        assert_eq!(after, before);
    }

    #[test]
    fn evaluation_after_preregistration_adds_no_duplicates() {
        let source = format!("{}\n7 |> fizzbuzz", FIZZBUZZ);
        let tokens = Lexer::new(&source).lex().expect("lex");
        let program = Parser::new(tokens).parse_program().expect("parse");
        let interpreter = Interpreter::new();
        interpreter.preregister(&program);
        interpreter.eval_program(&program).expect("eval");
        let candidates = interpreter
            .global()
            .dispatch_candidates("fizzbuzz")
            .expect("group should exist");
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn secondary_output_write_returns_early() {
        let source = "
            fn pick() {
                💩 = \"early\"
                \"late\"
            }
            1 |> pick
        ";
        assert_eq!(eval_ok(source), Value::Str("early".to_string()));
    }

    #[test]
    fn the_last_statement_is_the_implicit_return() {
        let source = "
            fn add_one(n) { n + 1 }
            add_one(41)
        ";
        assert_eq!(eval_ok(source), Value::Int(42));
    }

    #[test]
    fn return_markers_propagate_out_of_nested_blocks() {
        let source = "
            fn sign() {
                if (🍕 < 0) {
                    💩 = \"negative\"
                }
                \"non-negative\"
            }
            -4 |> sign
        ";
        assert_eq!(eval_ok(source), Value::Str("negative".to_string()));
    }

    #[test]
    fn declared_input_type_is_checked_before_invocation() {
        let source = "
            fn double(n: int) { n * 2 }
            \"abc\" |> double
        ";
        assert_eq!(
            eval_err(source),
            EvalError::InputTypeMismatch {
                name: "double".to_string(),
                expected: "int".to_string(),
                actual: "str".to_string()
            }
        );
    }

    #[test]
    fn declared_return_type_is_checked_after_unwrap() {
        let source = "
            fn shout(): str { 💩 = 42 }
            \"hi\" |> shout
        ";
        assert_eq!(
            eval_err(source),
            EvalError::ReturnTypeMismatch {
                name: "shout".to_string(),
                expected: "str".to_string(),
                actual: "int".to_string()
            }
        );
    }

    #[test]
    fn calling_an_unknown_name_fails() {
        assert_eq!(
            eval_err("1 |> nope"),
            EvalError::UndefinedFunction {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn referencing_an_unknown_identifier_fails() {
        assert_eq!(
            eval_err("nope"),
            EvalError::UndefinedIdentifier {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn lambdas_bind_parameters_pairwise() {
        let source = "
            let add = fn(x, y) { x + y }
            add(1, 2)
        ";
        assert_eq!(eval_ok(source), Value::Int(3));
    }

    #[test]
    fn surplus_arguments_are_an_arity_mismatch() {
        let source = "
            fn add_one(n) { n + 1 }
            add_one(1, 2, 3)
        ";
        assert_eq!(
            eval_err(source),
            EvalError::ArityMismatch {
                name: "add_one".to_string(),
                expected: 1,
                actual: 3
            }
        );
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let source = "
            let base = 10
            fn offset(n) { base + n }
            offset(5)
        ";
        assert_eq!(eval_ok(source), Value::Int(15));
    }

    #[test]
    fn if_else_takes_truthiness_of_the_condition() {
        assert_eq!(
            eval_ok("if (1 < 2) { \"yes\" } else { \"no\" }"),
            Value::Str("yes".to_string())
        );
        assert_eq!(eval_ok("if (false) { \"yes\" }"), Value::Null);
    }

    #[test]
    fn hash_index_and_member_access() {
        let source = "
            let h = { \"name\": \"Ada\", 1: true }
            h.name
        ";
        assert_eq!(eval_ok(source), Value::Str("Ada".to_string()));
        let source = "
            let h = { \"name\": \"Ada\", 1: true }
            h[1]
        ";
        assert_eq!(eval_ok(source), Value::Bool(true));
        let source = "
            let h = { \"name\": \"Ada\" }
            h.age
        ";
        assert_eq!(eval_ok(source), Value::Null);
    }

    #[test]
    fn standalone_secondary_output_yields_a_null_return() {
        let source = "
            fn noop() {
                💩
                \"unreachable\"
            }
            1 |> noop
        ";
        assert_eq!(eval_ok(source), Value::Null);
    }

    #[test]
    fn string_concatenation_and_comparison() {
        assert_eq!(
            eval_ok("\"foo\" + \"bar\""),
            Value::Str("foobar".to_string())
        );
        assert_eq!(eval_ok("\"abc\" < \"abd\""), Value::Bool(true));
    }

    #[test]
    fn single_argument_binds_both_pipe_value_and_parameter() {
        let source = "
            fn both(n) { n + 🍕 }
            both(21)
        ";
        assert_eq!(eval_ok(source), Value::Int(42));
    }

    #[test]
    fn a_single_conditional_candidate_is_invoked_directly() {
        // One candidate skips condition evaluation entirely, even when the
        // condition would be false.
        let source = "
            fn pick() when 🍕 > 100 { \"big\" }
            1 |> pick
        ";
        assert_eq!(eval_ok(source), Value::Str("big".to_string()));
    }

    #[test]
    fn null_subject_is_not_bound_as_the_pipe_value() {
        let source = "
            fn probe() { 🍕 }
            null |> probe
        ";
        assert_eq!(eval_err(source), EvalError::UndefinedPipeValue);
    }

    #[test]
    fn definition_order_does_not_change_results() {
        let before = "
            fn classify() when 🍕 % 2 == 0 { \"even\" }
            fn classify() { \"odd\" }
            6 |> classify
        ";
        let after = "
            let r = 6 |> classify
            fn classify() when 🍕 % 2 == 0 { \"even\" }
            fn classify() { \"odd\" }
            r
        ";
        assert_eq!(eval_ok(before), eval_ok(after));
    }
}
