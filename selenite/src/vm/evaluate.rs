//! The tree walking evaluator.
//!
//! Every expression is evaluated against one explicit operand [Stack]. An
//! expression pushes one value, except calls, which push however many values
//! the callee returned. Statements leave the stack as they found it.

use self::super::{
	CallFrame, CaptureMode, State,
	error::{Error, ErrorKind, RuntimeError},
	scope::Scope,
	table::Table,
	value::{Closure, UserObject, Value, parse_number}
};
use crate::{
	ast::{lexer::Position, parser::{BinaryOperator, Expression, LogicalOperator, UnaryOperator}},
	marshal::TypeDescriptor,
	recursion::ensure_sufficient_stack
};
use std::{mem::replace, rc::Rc};
use tracing::trace;

/// How many `__index` tables may be followed before giving up.
const INDEX_CHAIN: usize = 100;

macro_rules! metamethod_or_raise {
	($stack:ident, $state:ident, $name:expr, $left:ident, $right:ident,
			$kind:expr, $message:expr) => {
		match metamethod($name, &$left, &$right) {
			Value::Nil => {
				let message = $message;
				$stack.push($left);
				$stack.push($right);
				return Err(raise($state, $stack, $kind, message))
			},
			handler => first(call_function($state, $stack, handler, vec![$left, $right])?)
		}
	}
}

/// The operand stack.
///
/// Native functions see their arguments above the stack's base, and push
/// their results on top.
#[derive(Clone, Debug, Default)]
pub struct Stack {
	values: Vec<Value>,
	base: usize
}

impl Stack {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, value: Value) {
		self.values.push(value)
	}

	/// Pops the top value. Nothing below the base is ever popped, nil is
	/// returned instead.
	pub fn pop(&mut self) -> Value {
		match self.values.len() > self.base {
			true => self.values.pop().unwrap_or_default(),
			false => Value::Nil
		}
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// The top value, nil if there is nothing above the base.
	pub fn top(&self) -> Value {
		match self.values.len() > self.base {
			true => self.values.last().cloned().unwrap_or_default(),
			false => Value::Nil
		}
	}

	pub fn truncate(&mut self, len: usize) {
		self.values.truncate(len)
	}

	pub fn insert(&mut self, index: usize, value: Value) {
		let index = index.min(self.values.len());
		self.values.insert(index, value)
	}

	pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
		self.values.extend(values)
	}

	pub fn base(&self) -> usize {
		self.base
	}

	/// Sets the base, returning the old one.
	pub fn set_base(&mut self, base: usize) -> usize {
		replace(&mut self.base, base.min(self.values.len()))
	}

	/// The arguments of the running native function.
	pub fn arguments(&self) -> &[Value] {
		&self.values[self.base.min(self.values.len())..]
	}

	/// A single argument, nil if it wasn't given.
	pub fn argument(&self, index: usize) -> Value {
		self.arguments().get(index).cloned().unwrap_or_default()
	}

	/// Removes and returns the arguments of the running native function.
	pub fn take_arguments(&mut self) -> Vec<Value> {
		let base = self.base.min(self.values.len());
		self.values.split_off(base)
	}

	/// Removes and returns every value from `at` up.
	pub fn split_off(&mut self, at: usize) -> Vec<Value> {
		let at = at.min(self.values.len());
		self.values.split_off(at)
	}

	/// A copy of the whole stack, for error reports.
	pub fn snapshot(&self) -> Vec<Value> {
		self.values.clone()
	}
}

/// How control leaves an expression.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
	Normal,
	/// A `break`, ending the innermost loop.
	Break,
	/// A `return`, with how many values are on top of the stack.
	Return(usize)
}

/// Evaluates an expression.
///
/// Nesting deeper than [Options::max_depth][super::Options::max_depth] raises
/// a stack overflow. Below that, the native stack grows as needed, so the
/// limit holds whatever size of thread the host runs scripts on.
pub fn evaluate(expression: &Expression, stack: &mut Stack, state: &mut State)
		-> Result<Flow, Error> {
	state.depth += 1;
	let result = match state.depth > state.options.max_depth {
		true => Err(raise(state, stack, ErrorKind::StackOverflow, "stack overflow")),
		false => ensure_sufficient_stack(|| dispatch(expression, stack, state))
	};
	state.depth -= 1;
	result
}

fn dispatch(expression: &Expression, stack: &mut Stack, state: &mut State)
		-> Result<Flow, Error> {
	match expression {
		Expression::Literal(value) => stack.push(value.clone()),
		Expression::Identifier(name) => stack.push(state.lookup(name)),
		Expression::Table(fields) => construct(fields, stack, state)?,

		Expression::Lookup {target, key} => {
			let object = single(target, stack, state)?;
			let key = single(key, stack, state)?;
			let value = index(object, key, stack, state)?;
			stack.push(value)
		},

		Expression::Binary {left, operator, right} =>
			binary(left, *operator, right, stack, state)?,
		Expression::Unary {operator, operand} => unary(*operator, operand, stack, state)?,

		Expression::Logical {left, operator, right} => {
			let left = single(left, stack, state)?;
			match (operator, left.truthy()) {
				(LogicalOperator::And, false) | (LogicalOperator::Or, true) => stack.push(left),
				_ => value(right, stack, state)?
			}
		},

		Expression::Call {function, method, arguments, position} =>
			call(function, method.as_deref(), arguments, *position, stack, state)?,

		Expression::Function {name, parameters, body} => {
			let captured = match state.options.capture {
				// Snapshot capture. The closure sees enclosing locals as they were
				// when it was created, and its writes to them are lost.
				CaptureMode::Snapshot => state.scope.enter(),
				CaptureMode::Shared => state.scope.clone()
			};

			stack.push(Value::Closure(Rc::new(Closure::Script {
				name: name.clone(),
				parameters: parameters.clone(),
				body: body.clone(),
				captured
			})))
		},

		Expression::Assign {targets, values, local} =>
			assign(targets, values, *local, stack, state)?,

		Expression::Chunk(statements) =>
			return scoped(Vec::new(), stack, state, |stack, state| block(statements, stack, state)),

		Expression::If {branches, otherwise} => {
			for (condition, body) in branches {
				if single(condition, stack, state)?.truthy()
					{return evaluate(body, stack, state)}
			}

			if let Some(otherwise) = otherwise {return evaluate(otherwise, stack, state)}
		},

		Expression::While {condition, body} => {
			let start = stack.len();
			while single(condition, stack, state)?.truthy() {
				match evaluate(body, stack, state)? {
					Flow::Normal => stack.truncate(start),
					Flow::Break => {stack.truncate(start); break},
					flow @ Flow::Return(_) => return Ok(flow)
				}
			}
		},

		Expression::NumericFor {variable, start, limit, step, body} =>
			return numeric_for(variable, start, limit, step.as_deref(), body, stack, state),

		Expression::GenericFor {variables, iterators, body} =>
			return generic_for(variables, iterators, body, stack, state),

		Expression::Break => return Ok(Flow::Break),
		Expression::Return(values) => return Ok(Flow::Return(list(values, stack, state)?)),
		Expression::NoOp | Expression::Comment(_) => (),

		Expression::Index(_) => return Err(Error::Internal(
			"bracketed key outside of a table constructor".into()))
	}

	Ok(Flow::Normal)
}

/// Evaluates statements one after another, without entering a new scope.
pub fn block(statements: &[Expression], stack: &mut Stack, state: &mut State)
		-> Result<Flow, Error> {
	let start = stack.len();

	for statement in statements {
		match evaluate(statement, stack, state)? {
			Flow::Normal => stack.truncate(start),
			flow => return Ok(flow)
		}
	}

	Ok(Flow::Normal)
}

/// Runs `run` in a new scope with the given locals declared, restoring the
/// current scope afterwards, error or not.
fn scoped<F>(locals: Vec<(&str, Value)>, stack: &mut Stack, state: &mut State, run: F)
		-> Result<Flow, Error>
		where F: FnOnce(&mut Stack, &mut State) -> Result<Flow, Error> {
	let mut inner = state.scope.enter();
	locals.into_iter().for_each(|(name, value)| inner.declare(name, value));

	let outer = replace(&mut state.scope, inner);
	let result = run(stack, state);
	let inner = replace(&mut state.scope, outer);
	inner.exit(&state.scope);

	result
}

/// Evaluates an expression to exactly one value, and pushes it.
fn value(expression: &Expression, stack: &mut Stack, state: &mut State)
		-> Result<(), Error> {
	let start = stack.len();
	evaluate(expression, stack, state)?;

	match stack.len().saturating_sub(start) {
		0 => stack.push(Value::Nil),
		1 => (),
		_ => stack.truncate(start + 1)
	}
	Ok(())
}

/// Evaluates an expression to exactly one value, and returns it.
fn single(expression: &Expression, stack: &mut Stack, state: &mut State)
		-> Result<Value, Error> {
	value(expression, stack, state)?;
	Ok(stack.pop())
}

/// Evaluates a list of expressions, pushing one value for each, except for
/// the last which pushes all of its values. Returns how many were pushed.
fn list(expressions: &[Expression], stack: &mut Stack, state: &mut State)
		-> Result<usize, Error> {
	let start = stack.len();

	if let Some((last, rest)) = expressions.split_last() {
		rest.iter().try_for_each(|expression| value(expression, stack, state))?;
		evaluate(last, stack, state)?;
	}

	Ok(stack.len().saturating_sub(start))
}

/// The first of some values, nil if there are none.
fn first(values: Vec<Value>) -> Value {
	values.into_iter().next().unwrap_or_default()
}

/// Creates an error with the current stack and call stack attached.
pub(crate) fn raise(state: &State, stack: &Stack, kind: ErrorKind,
		message: impl Into<String>) -> Error {
	contextualize(state, stack, RuntimeError::new(kind, message))
}

/// Attaches the current stack and call stack to an error, unless it already
/// has them.
pub(crate) fn contextualize(state: &State, stack: &Stack, mut error: RuntimeError)
		-> Error {
	if error.stack.is_empty() {error.stack = stack.snapshot()}
	if error.trace.is_empty() {error.trace = state.call_stack.clone()}
	Error::Runtime(error)
}

/// Looks up a metamethod on the left operand, then on the right.
fn metamethod(name: &str, left: &Value, right: &Value) -> Value {
	[left, right].iter()
		.filter_map(|value| value.metatable())
		.map(|metatable| {
			let handler = metatable.borrow().get(&Value::from(name));
			handler
		})
		.find(|handler| !handler.is_nil())
		.unwrap_or_default()
}

fn construct(fields: &[Expression], stack: &mut Stack, state: &mut State)
		-> Result<(), Error> {
	let mut table = Table::new();
	let mut counter = 1i64;

	for (index, field) in fields.iter().enumerate() {
		match field {
			Expression::Assign {targets, values, ..} => {
				let key = match targets.first() {
					Some(Expression::Identifier(name)) => Value::from(name.as_str()),
					Some(Expression::Index(key)) => single(key, stack, state)?,
					_ => return Err(Error::Internal("malformed table constructor field".into()))
				};
				let value = match values.first() {
					Some(value) => single(value, stack, state)?,
					None => Value::Nil
				};

				check_key(&key, stack, state)?;
				table.set(key, value)
			},

			// The last positional field expands to every value it produces.
			field if index + 1 == fields.len() => {
				let start = stack.len();
				evaluate(field, stack, state)?;
				for value in stack.split_off(start)
					{table.set(Value::from(counter), value); counter += 1}
			},

			field => {
				let value = single(field, stack, state)?;
				table.set(Value::from(counter), value);
				counter += 1
			}
		}
	}

	stack.push(Value::from(table));
	Ok(())
}

fn check_key(key: &Value, stack: &Stack, state: &State) -> Result<(), Error> {
	match key {
		Value::Nil => Err(raise(state, stack, ErrorKind::NilIndex, "index is nil")),
		Value::Number(number, _) if number.is_nan() =>
			Err(raise(state, stack, ErrorKind::NilIndex, "index is NaN")),
		_ => Ok(())
	}
}

fn descriptor(object: &UserObject, state: &State) -> Option<Rc<TypeDescriptor>> {
	object.descriptor().cloned()
		.or_else(|| state.types.get(&object.type_id()).cloned())
}

/// Indexes a value, following `__index`.
pub(crate) fn index(object: Value, key: Value, stack: &mut Stack, state: &mut State)
		-> Result<Value, Error> {
	let mut object = object;

	for _ in 0..INDEX_CHAIN {
		match object {
			Value::Table(table) => {
				let (raw, handler) = {
					let table = table.borrow();
					(table.get(&key), table.metamethod("__index"))
				};

				match (raw, handler) {
					(Value::Nil, handler @ Value::Closure(_)) => return Ok(first(
						call_function(state, stack, handler, vec![Value::Table(table), key])?)),
					(Value::Nil, Value::Nil) => return Ok(Value::Nil),
					(Value::Nil, handler) => object = handler,
					(raw, _) => return Ok(raw)
				}
			},

			Value::UserObject(object) => {
				let descriptor = match descriptor(&object, state) {
					Some(descriptor) => descriptor,
					None => return Err(raise(state, stack, ErrorKind::UnregisteredType,
						format!("unregistered host type {}", object.type_name())))
				};

				return match key.string() {
					Some(name) => descriptor.get(&object, name)
						.map_err(|error| contextualize(state, stack, error)),
					None => Ok(Value::Nil)
				}
			},

			Value::String(_) => {
				let library = state.globals.borrow().get(&Value::from("string"));
				return Ok(match library {
					Value::Table(library) => library.borrow().get(&key),
					_ => Value::Nil
				})
			},

			Value::Nil => return Err(raise(state, stack, ErrorKind::IndexNonTable,
				"index on nil value")),
			other => return Err(raise(state, stack, ErrorKind::IndexNonTable,
				format!("index on non-table value (a {} value)", other.type_name())))
		}
	}

	Err(raise(state, stack, ErrorKind::IndexNonTable, "'__index' chain is too long"))
}

/// Writes to an index of a value.
pub(crate) fn set_index(object: Value, key: Value, value: Value, stack: &mut Stack,
		state: &mut State) -> Result<(), Error> {
	match object {
		Value::Table(table) => {
			check_key(&key, stack, state)?;

			let handler = {
				let table = table.borrow();
				match table.contains(&key) {
					true => Value::Nil,
					false => table.metamethod("__newindex")
				}
			};

			match handler {
				Value::Nil => table.borrow_mut().set(key, value),
				Value::Table(handler) => set_index(Value::Table(handler), key, value, stack, state)?,
				handler => drop(call_function(state, stack, handler,
					vec![Value::Table(table), key, value])?)
			}
			Ok(())
		},

		Value::UserObject(object) => {
			let descriptor = match descriptor(&object, state) {
				Some(descriptor) => descriptor,
				None => return Err(raise(state, stack, ErrorKind::UnregisteredType,
					format!("unregistered host type {}", object.type_name())))
			};
			let name = key.string().unwrap_or_default();

			descriptor.set(&object, name, value)
				.map_err(|error| contextualize(state, stack, error))
		},

		Value::Nil => Err(raise(state, stack, ErrorKind::IndexNonTable, "index on nil value")),
		other => Err(raise(state, stack, ErrorKind::IndexNonTable,
			format!("index on non-table value (a {} value)", other.type_name())))
	}
}

fn assign(targets: &[Expression], values: &[Expression], local: bool,
		stack: &mut Stack, state: &mut State) -> Result<(), Error> {
	let start = stack.len();
	list(values, stack, state)?;
	let mut values = stack.split_off(start);
	values.resize(targets.len(), Value::Nil);

	for (target, value) in targets.iter().zip(values) {
		match (target, local) {
			(Expression::Identifier(name), true) => state.scope.declare(name, value),
			(Expression::Identifier(name), false) => state.assign(name, value),
			(Expression::Lookup {target, key}, false) => {
				let object = single(target, stack, state)?;
				let key = single(key, stack, state)?;
				set_index(object, key, value, stack, state)?
			},
			_ => return Err(Error::Internal("invalid assignment target".into()))
		}
	}

	Ok(())
}

fn binary(left: &Expression, operator: BinaryOperator, right: &Expression,
		stack: &mut Stack, state: &mut State) -> Result<(), Error> {
	let name = operator.metamethod().unwrap_or_default();

	let result = match operator {
		BinaryOperator::Add | BinaryOperator::Subtract | BinaryOperator::Multiply |
				BinaryOperator::Divide | BinaryOperator::Modulo | BinaryOperator::Exponent => {
			let right = single(right, stack, state)?;
			let left = single(left, stack, state)?;

			match (left, right) {
				(Value::Number(left, left_integer), Value::Number(right, right_integer)) =>
					arithmetic(operator, left, right, left_integer && right_integer),
				(left, right) => metamethod_or_raise!(stack, state, name, left, right,
					ErrorKind::Arithmetic, format!("arithmetic on non-number ({} {} {})",
						left.type_name(), operator, right.type_name()))
			}
		},

		BinaryOperator::Equal | BinaryOperator::NotEqual => {
			let left = single(left, stack, state)?;
			let right = single(right, stack, state)?;
			let equal = equals(left, right, stack, state)?;
			Value::Boolean(equal == (operator == BinaryOperator::Equal))
		},

		BinaryOperator::LessThan | BinaryOperator::LessThanOrEqual |
				BinaryOperator::GreaterThan | BinaryOperator::GreaterThanOrEqual => {
			let left = single(left, stack, state)?;
			let right = single(right, stack, state)?;

			// Greater than is less than with the operands swapped.
			let (left, right) = match operator {
				BinaryOperator::GreaterThan | BinaryOperator::GreaterThanOrEqual => (right, left),
				_ => (left, right)
			};
			let inclusive = matches!(operator,
				BinaryOperator::LessThanOrEqual | BinaryOperator::GreaterThanOrEqual);

			match (left, right) {
				(Value::Number(left, _), Value::Number(right, _)) =>
					Value::Boolean(if inclusive {left <= right} else {left < right}),
				(left, right) => Value::Boolean(metamethod_or_raise!(stack, state, name,
					left, right, ErrorKind::Comparison, format!("comparison type mismatch ({} {} {})",
						left.type_name(), operator, right.type_name())).truthy())
			}
		},

		BinaryOperator::Concat => {
			let left = single(left, stack, state)?;
			let right = single(right, stack, state)?;

			match (left, right) {
				(left @ (Value::Number(..) | Value::String(_)),
						right @ (Value::Number(..) | Value::String(_))) =>
					Value::new_string(format!("{}{}", left, right)),
				(left, right) => metamethod_or_raise!(stack, state, name, left, right,
					ErrorKind::Concatenation, format!("concatenation on non-concatenable value ({} .. {})",
						left.type_name(), right.type_name()))
			}
		}
	};

	stack.push(result);
	Ok(())
}

/// Arithmetic on two numbers. The integer hint survives `+ - * %` when both
/// operands carry it and the result is finite.
pub fn arithmetic(operator: BinaryOperator, left: f64, right: f64, integer: bool)
		-> Value {
	let (result, integer) = match operator {
		BinaryOperator::Add => (left + right, integer),
		BinaryOperator::Subtract => (left - right, integer),
		BinaryOperator::Multiply => (left * right, integer),
		BinaryOperator::Divide => (left / right, false),
		BinaryOperator::Modulo => (left - (left / right).floor() * right, integer),
		BinaryOperator::Exponent => (left.powf(right), false),
		_ => (f64::NAN, false)
	};

	Value::Number(result, integer && result.is_finite())
}

/// Value equality, consulting `__eq` for two distinct tables.
fn equals(left: Value, right: Value, stack: &mut Stack, state: &mut State)
		-> Result<bool, Error> {
	if left == right {return Ok(true)}

	match (&left, &right) {
		(Value::Table(_), Value::Table(_)) => match metamethod("__eq", &left, &right) {
			Value::Nil => Ok(false),
			handler => Ok(first(call_function(state, stack, handler, vec![left, right])?).truthy())
		},
		_ => Ok(false)
	}
}

fn unary(operator: UnaryOperator, operand: &Expression, stack: &mut Stack,
		state: &mut State) -> Result<(), Error> {
	let operand = single(operand, stack, state)?;

	let result = match (operator, operand) {
		(UnaryOperator::Not, operand) => Value::Boolean(!operand.truthy()),

		(UnaryOperator::Negate, Value::Number(number, integer)) => Value::Number(-number, integer),
		(UnaryOperator::Negate, operand) => match operand.string().and_then(parse_number) {
			Some(Value::Number(number, integer)) => Value::Number(-number, integer),
			_ => match metamethod("__unm", &operand, &operand) {
				Value::Nil => {
					let message = format!("arithmetic on non-number (-{})", operand.type_name());
					stack.push(operand);
					return Err(raise(state, stack, ErrorKind::Arithmetic, message))
				},
				handler => first(call_function(state, stack, handler,
					vec![operand.clone(), operand])?)
			}
		},

		(UnaryOperator::Length, Value::String(string)) => Value::from(string.len()),
		(UnaryOperator::Length, Value::Table(table)) => {
			let handler = table.borrow().metamethod("__len");
			match handler {
				Value::Nil => Value::from(table.borrow().len()),
				handler => first(call_function(state, stack, handler, vec![Value::Table(table)])?)
			}
		},
		(UnaryOperator::Length, operand) => {
			let message = format!("attempt to get length of a {} value", operand.type_name());
			stack.push(operand);
			return Err(raise(state, stack, ErrorKind::Length, message))
		}
	};

	stack.push(result);
	Ok(())
}

/// A readable name for the function being called, for the call stack.
fn title(function: &Expression, method: Option<&str>) -> String {
	let function = match function {
		Expression::Identifier(_) | Expression::Lookup {..} => function.to_string(),
		_ => "function".to_owned()
	};

	match method {
		Some(method) => format!("{}:{}", function, method),
		None => function
	}
}

fn call(function: &Expression, method: Option<&str>, arguments: &[Expression],
		position: Position, stack: &mut Stack, state: &mut State) -> Result<(), Error> {
	let base = stack.len();

	let callee = match method {
		Some(method) => {
			let object = single(function, stack, state)?;
			stack.push(object.clone());
			let callee = index(object, Value::from(method), stack, state)?;
			list(arguments, stack, state)?;
			callee
		},
		None => {
			list(arguments, stack, state)?;
			single(function, stack, state)?
		}
	};

	let title = title(function, method);
	trace!(function = %title, %position, "call");
	state.call_stack.push(CallFrame {title, position: Some(position)});
	let result = call_value(callee, base, stack, state);
	state.call_stack.pop();

	result.map(drop)
}

/// Calls a value with the arguments on the stack from `base` up. The results
/// replace the arguments, and their count is returned.
pub(crate) fn call_value(callee: Value, base: usize, stack: &mut Stack,
		state: &mut State) -> Result<usize, Error> {
	let closure = match callee {
		Value::Closure(closure) => closure,

		Value::Table(table) => {
			let handler = table.borrow().metamethod("__call");
			return match handler {
				handler @ Value::Closure(_) => {
					stack.insert(base, Value::Table(table));
					call_value(handler, base, stack, state)
				},
				_ => Err(raise(state, stack, ErrorKind::CallNonFunction,
					"attempt to call a non-function value"))
			}
		},

		_ => return Err(raise(state, stack, ErrorKind::CallNonFunction,
			"attempt to call a non-function value"))
	};

	match &*closure {
		Closure::Native(function) => {
			let saved = stack.set_base(base);
			let result = function(state, stack);
			stack.set_base(saved);

			let count = result.map_err(|error| match error {
				Error::Runtime(error) => contextualize(state, stack, error),
				error => error
			})?;
			Ok(settle(count, base, stack))
		},

		Closure::Script {name, parameters, body, captured} => {
			let mut arguments = stack.split_off(base);
			arguments.resize(parameters.len(), Value::Nil);

			let mut frame = captured.enter();
			if let Some(name) = name {frame.declare(name, Value::Closure(closure.clone()))}
			parameters.iter().zip(arguments)
				.for_each(|(parameter, argument)| frame.declare(parameter, argument));

			let caller = replace(&mut state.scope, frame);
			let result = evaluate(body, stack, state);
			let frame: Scope = replace(&mut state.scope, caller);
			if let CaptureMode::Shared = state.options.capture {frame.exit(captured)}

			match result? {
				Flow::Return(count) => Ok(settle(count, base, stack)),
				Flow::Normal | Flow::Break => {stack.truncate(base); Ok(0)}
			}
		}
	}
}

/// Moves the top `count` values down to `base`, dropping everything between.
fn settle(count: usize, base: usize, stack: &mut Stack) -> usize {
	let top = stack.len().saturating_sub(count).max(base);
	let results = stack.split_off(top);
	stack.truncate(base);

	let count = results.len();
	stack.extend(results);
	count
}

/// Calls a function with the arguments given, returning its results.
pub fn call_function(state: &mut State, stack: &mut Stack, function: Value,
		arguments: Vec<Value>) -> Result<Vec<Value>, Error> {
	let base = stack.len();
	stack.extend(arguments);

	match call_value(function, base, stack, state) {
		Ok(_) => Ok(stack.split_off(base)),
		Err(error) => {stack.truncate(base); Err(error)}
	}
}

fn numeric_for(variable: &str, start: &Expression, limit: &Expression,
		step: Option<&Expression>, body: &Expression, stack: &mut Stack,
		state: &mut State) -> Result<Flow, Error> {
	let start = single(start, stack, state)?;
	let limit = single(limit, stack, state)?;
	let step = match step {
		Some(step) => single(step, stack, state)?,
		None => Value::Number(1.0, true)
	};

	let (current, limit, step, integer) = match (start, limit, step) {
		(Value::Number(start, a), Value::Number(limit, b), Value::Number(step, c)) =>
			(start, limit, step, a && b && c),
		_ => return Err(raise(state, stack, ErrorKind::Arithmetic,
			"'for' values must be numbers"))
	};
	if step == 0.0
		{return Err(raise(state, stack, ErrorKind::Arithmetic, "'for' step is zero"))}

	let stack_start = stack.len();
	let mut current = current;
	while (step > 0.0 && current <= limit) || (step <= 0.0 && current >= limit) {
		let locals = vec![(variable, Value::Number(current, integer))];
		match scoped(locals, stack, state, |stack, state| evaluate(body, stack, state))? {
			Flow::Normal => stack.truncate(stack_start),
			Flow::Break => {stack.truncate(stack_start); break},
			flow @ Flow::Return(_) => return Ok(flow)
		}

		current += step
	}

	Ok(Flow::Normal)
}

fn generic_for(variables: &[String], iterators: &[Expression], body: &Expression,
		stack: &mut Stack, state: &mut State) -> Result<Flow, Error> {
	let start = stack.len();
	list(iterators, stack, state)?;
	let mut iterator = stack.split_off(start).into_iter();
	let function = iterator.next().unwrap_or_default();
	let invariant = iterator.next().unwrap_or_default();
	let mut control = iterator.next().unwrap_or_default();

	loop {
		let mut results = call_function(state, stack, function.clone(),
			vec![invariant.clone(), control.clone()])?;
		results.resize(variables.len().max(1), Value::Nil);
		if results[0].is_nil() {break}
		control = results[0].clone();

		let locals = variables.iter().map(String::as_str).zip(results).collect();
		match scoped(locals, stack, state, |stack, state| evaluate(body, stack, state))? {
			Flow::Normal => stack.truncate(start),
			Flow::Break => {stack.truncate(start); break},
			flow @ Flow::Return(_) => return Ok(flow)
		}
	}

	Ok(Flow::Normal)
}
